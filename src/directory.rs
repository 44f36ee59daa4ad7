//! User/location directory.
//!
//! The dispatch engine reads users, tokens and activities through
//! [`UserLocationDirectory`]. Production deployments implement it over their
//! own store; [`SnapshotDirectory`] serves a JSON snapshot for staging and
//! local runs.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo;
use crate::push::token;

/// A candidate recipient returned by a proximity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyUser {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Registered device token, if any.
    #[serde(default)]
    pub token: Option<String>,
    /// Distance from the query point when the backend computed it.
    #[serde(default)]
    pub distance_km: Option<f64>,
}

/// Activity fields used by notification templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub meeting_time: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub creator_display_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// Lookup contract consumed by the dispatch engine.
///
/// Absence is `Ok(None)`; `Err` means the backend itself failed.
#[async_trait]
pub trait UserLocationDirectory: Send + Sync {
    /// Users with a token within `radius_km` of the point.
    async fn find_nearby(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<NearbyUser>>;

    /// Users with a token and known coordinates, at most `limit` of them.
    ///
    /// Backs the degraded path when [`Self::find_nearby`] is unavailable.
    async fn users_with_location(&self, limit: usize) -> Result<Vec<NearbyUser>>;

    /// Device token registered for `user_id`.
    async fn get_device_token(&self, user_id: &str) -> Result<Option<String>>;

    /// Activity by id.
    async fn get_activity_details(&self, activity_id: &str) -> Result<Option<ActivityDetails>>;
}

/// A user row in a snapshot file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUser {
    pub user_id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub device_token: Option<String>,
}

impl SnapshotUser {
    fn usable_token(&self) -> Option<&str> {
        self.device_token
            .as_deref()
            .filter(|t| token::is_usable(t))
    }

    fn located(&self) -> Option<NearbyUser> {
        Some(NearbyUser {
            user_id: self.user_id.clone(),
            latitude: self.latitude?,
            longitude: self.longitude?,
            token: Some(self.usable_token()?.to_string()),
            distance_km: None,
        })
    }
}

/// Snapshot file layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<SnapshotUser>,
    #[serde(default)]
    pub activities: Vec<ActivityDetails>,
}

/// In-memory directory loaded from a JSON snapshot.
#[derive(Debug, Default)]
pub struct SnapshotDirectory {
    users: Vec<SnapshotUser>,
    tokens: HashMap<String, String>,
    activities: HashMap<String, ActivityDetails>,
}

impl SnapshotDirectory {
    /// A directory with nobody in it.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let tokens = snapshot
            .users
            .iter()
            .filter_map(|u| Some((u.user_id.clone(), u.usable_token()?.to_string())))
            .collect();
        let activities = snapshot
            .activities
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        Self {
            users: snapshot.users,
            tokens,
            activities,
        }
    }

    /// Load a snapshot file. An empty path yields an empty directory.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            info!("No directory snapshot configured, starting with an empty directory");
            return Ok(Self::empty());
        }

        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Directory(format!(
                "Failed to read snapshot '{}': {e}",
                path.display()
            ))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;

        info!(
            users = snapshot.users.len(),
            activities = snapshot.activities.len(),
            "Loaded directory snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }
}

#[async_trait]
impl UserLocationDirectory for SnapshotDirectory {
    async fn find_nearby(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<NearbyUser>> {
        let mut nearby: Vec<NearbyUser> = self
            .users
            .iter()
            .filter_map(SnapshotUser::located)
            .filter_map(|mut user| {
                let d = geo::distance_km(lat, lon, user.latitude, user.longitude);
                (d <= radius_km).then(|| {
                    user.distance_km = Some(d);
                    user
                })
            })
            .collect();
        nearby.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(count = nearby.len(), radius_km, "Snapshot proximity lookup");
        Ok(nearby)
    }

    async fn users_with_location(&self, limit: usize) -> Result<Vec<NearbyUser>> {
        Ok(self
            .users
            .iter()
            .filter_map(SnapshotUser::located)
            .take(limit)
            .collect())
    }

    async fn get_device_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.get(user_id).cloned())
    }

    async fn get_activity_details(&self, activity_id: &str) -> Result<Option<ActivityDetails>> {
        Ok(self.activities.get(activity_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SNAPSHOT: &str = r#"{
        "users": [
            { "userId": "near", "latitude": 40.7200, "longitude": -74.0000, "deviceToken": "tok-near-0000000000" },
            { "userId": "far", "latitude": 40.9000, "longitude": -74.0060, "deviceToken": "tok-far-00000000000" },
            { "userId": "no-token", "latitude": 40.7128, "longitude": -74.0060 },
            { "userId": "blank-token", "latitude": 40.7128, "longitude": -74.0060, "deviceToken": "  " },
            { "userId": "no-location", "deviceToken": "tok-noloc-000000000" },
            { "userId": "closest", "latitude": 40.7129, "longitude": -74.0061, "deviceToken": "tok-closest-0000000" }
        ],
        "activities": [
            {
                "id": "act-1",
                "title": "Sunset hike",
                "meetingTime": "2026-06-01T18:00:00Z",
                "createdBy": "creator",
                "creatorDisplayName": "Dana",
                "city": "New York"
            }
        ]
    }"#;

    fn snapshot_directory() -> SnapshotDirectory {
        SnapshotDirectory::from_snapshot(serde_json::from_str(SNAPSHOT).unwrap())
    }

    #[tokio::test]
    async fn test_find_nearby_filters_and_sorts() {
        let directory = snapshot_directory();
        let nearby = directory.find_nearby(40.7128, -74.0060, 10.0).await.unwrap();

        let ids: Vec<&str> = nearby.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["closest", "near"]);
        assert!(nearby.iter().all(|u| u.distance_km.unwrap() <= 10.0));
    }

    #[tokio::test]
    async fn test_users_with_location_respects_limit() {
        let directory = snapshot_directory();

        let all = directory.users_with_location(100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|u| u.token.is_some()));

        let capped = directory.users_with_location(1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_get_device_token() {
        let directory = snapshot_directory();
        assert_eq!(
            directory.get_device_token("no-location").await.unwrap(),
            Some("tok-noloc-000000000".to_string())
        );
        assert_eq!(directory.get_device_token("no-token").await.unwrap(), None);
        assert_eq!(directory.get_device_token("blank-token").await.unwrap(), None);
        assert_eq!(directory.get_device_token("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_activity_details() {
        let directory = snapshot_directory();
        let activity = directory.get_activity_details("act-1").await.unwrap().unwrap();
        assert_eq!(activity.title, "Sunset hike");
        assert_eq!(activity.created_by, "creator");
        assert_eq!(activity.city.as_deref(), Some("New York"));
        assert!(directory.get_activity_details("act-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();

        let directory = SnapshotDirectory::load(file.path()).await.unwrap();
        assert!(directory.get_activity_details("act-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_empty_path() {
        let directory = SnapshotDirectory::load("").await.unwrap();
        assert!(directory.find_nearby(0.0, 0.0, 10.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = SnapshotDirectory::load("/nonexistent/snapshot.json").await;
        assert!(matches!(result, Err(Error::Directory(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let result = SnapshotDirectory::load(file.path()).await;
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
