//! Dispatch engine.
//!
//! Drives one [`NotificationEvent`] through
//! `RESOLVING → FILTERING → BUILDING → SENDING → AGGREGATING` and always
//! hands back a [`DispatchReport`]. Directory and provider failures are
//! folded into the report; nothing here retries.
//!
//! Recipients are sent in batches capped at the provider's batch limit.
//! Batches run concurrently and each one is bounded by the dispatch
//! deadline; a batch that fails or runs out of time marks only its own
//! recipients as failed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::config::DispatchConfig;
use crate::directory::{ActivityDetails, NearbyUser, UserLocationDirectory};
use crate::error::{Error, Result};
use crate::events::{self, NotificationEvent};
use crate::geo;
use crate::metrics::Metrics;
use crate::push::payload::NotificationPayload;
use crate::push::provider::{PushProvider, SendOutcome, TIMEOUT_ERROR_CODE, TRANSPORT_ERROR_CODE};
use crate::push::report::{DispatchReason, DispatchReport, DispatchResult, ResultAggregator};
use crate::push::token::{is_usable, redact};

/// A resolved target with every token it should receive.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    /// `None` for explicit-token sends.
    pub user_id: Option<String>,
    pub tokens: Vec<String>,
    /// Distance from the event origin, for proximity events.
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Resolving,
    Filtering,
    Building,
    Sending,
    Aggregating,
}

/// One raw directory row before filtering.
#[derive(Debug)]
struct Candidate {
    user_id: Option<String>,
    token: Option<String>,
    distance_km: Option<f64>,
}

/// Content recipe. Proximity content depends on who survives filtering.
enum Template {
    Ready(NotificationPayload),
    Nearby {
        activity: ActivityDetails,
        city: Option<String>,
    },
}

enum Resolution {
    Candidates {
        candidates: Vec<Candidate>,
        degraded: bool,
        actor: Option<String>,
        template: Template,
    },
    Topic {
        topic: String,
        content: NotificationPayload,
    },
    Finished(DispatchReport),
}

/// Presence-checked result of a single directory lookup.
enum Lookup<T> {
    Found(T),
    Missing,
    Failed,
}

/// Result of one bounded provider call.
enum Call<T> {
    Done(T),
    Failed(Error),
    TimedOut,
}

fn transport_failure() -> SendOutcome {
    SendOutcome::rejected(TRANSPORT_ERROR_CODE, "transport error")
}

fn timeout_failure() -> SendOutcome {
    SendOutcome::rejected(TIMEOUT_ERROR_CODE, "timeout")
}

/// Orchestrates directory lookups, payload building and provider calls.
pub struct DispatchEngine {
    directory: Arc<dyn UserLocationDirectory>,
    provider: Arc<dyn PushProvider>,
    config: DispatchConfig,
    metrics: Option<Arc<Metrics>>,
}

impl DispatchEngine {
    pub fn new(
        directory: Arc<dyn UserLocationDirectory>,
        provider: Arc<dyn PushProvider>,
        config: DispatchConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            directory,
            provider,
            config,
            metrics,
        }
    }

    /// The push transport this engine sends through.
    pub fn provider(&self) -> &Arc<dyn PushProvider> {
        &self.provider
    }

    /// Dispatch with the configured deadline.
    pub async fn dispatch(&self, event: &NotificationEvent) -> DispatchReport {
        let deadline = Instant::now() + self.config.deadline();
        self.dispatch_until(event, deadline).await
    }

    /// Dispatch with a caller-supplied deadline. Work still in flight at the
    /// deadline is abandoned and its recipients reported as timed out.
    pub async fn dispatch_until(
        &self,
        event: &NotificationEvent,
        deadline: Instant,
    ) -> DispatchReport {
        let started = std::time::Instant::now();
        let kind = event.kind();

        let report = match self.run(event, deadline).await {
            Ok(report) => report,
            Err(Error::InvalidInput(reason)) => {
                debug!(kind, reason = %reason, "Rejected invalid event");
                DispatchReport::rejected(DispatchReason::InvalidInput, reason)
            }
            Err(e) => {
                warn!(kind, error = %e, "Dispatch aborted");
                DispatchReport::rejected(DispatchReason::AllFailed, e.to_string())
            }
        };

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_dispatch(kind, report.reason.as_str(), elapsed.as_secs_f64());
        }
        info!(
            kind,
            reason = report.reason.as_str(),
            sent = report.notifications_sent,
            failed = report.notifications_failed,
            total = report.total_recipients,
            candidates = report.candidates,
            degraded = report.degraded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Dispatch complete"
        );
        report
    }

    async fn run(&self, event: &NotificationEvent, deadline: Instant) -> Result<DispatchReport> {
        event.validate()?;

        trace!(stage = ?Stage::Resolving, kind = event.kind());
        let resolution = match timeout_at(deadline, self.resolve(event)).await {
            Ok(resolution) => resolution,
            Err(_) => {
                warn!(kind = event.kind(), "Directory lookup ran past the dispatch deadline");
                return Ok(DispatchReport::no_recipients(0, false));
            }
        };

        let (candidates, degraded, actor, template) = match resolution {
            Resolution::Finished(report) => return Ok(report),
            Resolution::Topic { topic, content } => {
                return self.send_topic(&topic, content, deadline).await;
            }
            Resolution::Candidates {
                candidates,
                degraded,
                actor,
                template,
            } => (candidates, degraded, actor, template),
        };

        if candidates.is_empty() {
            return Ok(DispatchReport::no_recipients(0, degraded));
        }
        let candidate_count = candidates.len();
        if let Some(metrics) = &self.metrics {
            metrics.record_recipients_resolved(candidate_count);
        }

        trace!(stage = ?Stage::Filtering, candidates = candidate_count);
        let recipients = filter_recipients(candidates, actor.as_deref());
        if recipients.is_empty() {
            debug!(
                candidates = candidate_count,
                "No eligible recipients after filtering"
            );
            return Ok(DispatchReport::no_recipients(candidate_count, degraded));
        }

        trace!(stage = ?Stage::Building, recipients = recipients.len());
        let content = match template {
            Template::Ready(content) => content,
            Template::Nearby { activity, city } => {
                let distances: Vec<f64> = recipients.iter().filter_map(|r| r.distance_km).collect();
                let avg = geo::mean_km(&distances).unwrap_or(0.0);
                events::activity_nearby(&activity, city.as_deref(), avg, recipients.len())
            }
        };
        content.validate()?;

        let tokens: Vec<String> = recipients
            .iter()
            .flat_map(|r| r.tokens.iter().cloned())
            .collect();

        trace!(stage = ?Stage::Sending, tokens = tokens.len());
        let results = self.send_tokens(&tokens, &content, deadline).await;

        trace!(stage = ?Stage::Aggregating, results = results.len());
        self.record_results(&results);
        let mut aggregator = ResultAggregator::new(candidate_count, recipients.len(), degraded);
        aggregator.extend(results);
        Ok(aggregator.finish())
    }

    async fn resolve(&self, event: &NotificationEvent) -> Resolution {
        match event {
            NotificationEvent::DirectMessage {
                sender_id,
                sender_name,
                receiver_id,
                message,
                conversation_id,
            } => {
                if sender_id == receiver_id {
                    return Resolution::Finished(DispatchReport::skipped_self(
                        "skipped, is sender",
                    ));
                }
                let content = events::direct_message(
                    sender_id,
                    sender_name,
                    message,
                    conversation_id.as_deref(),
                );
                self.addressed(receiver_id, sender_id, content).await
            }
            NotificationEvent::FriendRequest {
                sender_id,
                sender_name,
                receiver_id,
                request_id,
            } => {
                if sender_id == receiver_id {
                    return Resolution::Finished(DispatchReport::skipped_self(
                        "skipped, is sender",
                    ));
                }
                let content =
                    events::friend_request(sender_id, sender_name, request_id.as_deref());
                self.addressed(receiver_id, sender_id, content).await
            }
            NotificationEvent::ActivityJoin {
                activity_id,
                joiner_id,
                joiner_name,
            } => {
                let activity = match self.activity(activity_id).await {
                    Lookup::Found(activity) => activity,
                    Lookup::Missing => return activity_not_found(),
                    Lookup::Failed => {
                        return Resolution::Finished(DispatchReport::no_recipients(0, false));
                    }
                };
                if *joiner_id == activity.created_by {
                    return Resolution::Finished(DispatchReport::skipped_self(
                        "skipped, is creator",
                    ));
                }
                let content = events::activity_join(&activity, joiner_id, joiner_name);
                self.addressed(&activity.created_by, joiner_id, content)
                    .await
            }
            NotificationEvent::ActivityNearby {
                activity_id,
                latitude,
                longitude,
                city,
                radius_km,
            } => {
                let activity = match self.activity(activity_id).await {
                    Lookup::Found(activity) => activity,
                    Lookup::Missing => return activity_not_found(),
                    Lookup::Failed => {
                        return Resolution::Finished(DispatchReport::no_recipients(0, false));
                    }
                };
                let radius = radius_km.unwrap_or(self.config.radius_km);
                let Some((users, degraded)) = self.nearby(*latitude, *longitude, radius).await
                else {
                    return Resolution::Finished(DispatchReport::no_recipients(0, true));
                };

                let candidates = users
                    .into_iter()
                    .map(|user| Candidate {
                        distance_km: Some(user.distance_km.unwrap_or_else(|| {
                            geo::distance_km(*latitude, *longitude, user.latitude, user.longitude)
                        })),
                        user_id: Some(user.user_id),
                        token: user.token,
                    })
                    .collect();

                Resolution::Candidates {
                    candidates,
                    degraded,
                    actor: Some(activity.created_by.clone()),
                    template: Template::Nearby {
                        activity,
                        city: city.clone(),
                    },
                }
            }
            NotificationEvent::TopicBroadcast {
                topic,
                title,
                message,
            } => Resolution::Topic {
                topic: topic.clone(),
                content: events::topic_broadcast(
                    topic,
                    title.as_deref(),
                    message,
                    &self.config.app_name,
                ),
            },
            NotificationEvent::Custom {
                tokens,
                title,
                body,
                data,
            } => Resolution::Candidates {
                candidates: tokens
                    .iter()
                    .map(|t| Candidate {
                        user_id: None,
                        token: Some(t.clone()),
                        distance_km: None,
                    })
                    .collect(),
                degraded: false,
                actor: None,
                template: Template::Ready(events::custom(title, body, data)),
            },
        }
    }

    /// Resolve the single receiver of an addressed event.
    async fn addressed(
        &self,
        receiver_id: &str,
        actor_id: &str,
        content: NotificationPayload,
    ) -> Resolution {
        match self.device_token(receiver_id).await {
            Lookup::Found(token) => Resolution::Candidates {
                candidates: vec![Candidate {
                    user_id: Some(receiver_id.to_string()),
                    token: Some(token),
                    distance_km: None,
                }],
                degraded: false,
                actor: Some(actor_id.to_string()),
                template: Template::Ready(content),
            },
            Lookup::Missing => {
                debug!("Receiver has no registered device token");
                Resolution::Finished(DispatchReport::rejected(
                    DispatchReason::NoDeviceToken,
                    "No device token found for receiver",
                ))
            }
            Lookup::Failed => Resolution::Finished(DispatchReport::no_recipients(0, false)),
        }
    }

    async fn device_token(&self, user_id: &str) -> Lookup<String> {
        match self.directory.get_device_token(user_id).await {
            Ok(Some(token)) if is_usable(&token) => Lookup::Found(token),
            Ok(_) => Lookup::Missing,
            Err(e) => {
                warn!(error = %e, "Device token lookup failed");
                Lookup::Failed
            }
        }
    }

    async fn activity(&self, activity_id: &str) -> Lookup<ActivityDetails> {
        match self.directory.get_activity_details(activity_id).await {
            Ok(Some(activity)) => Lookup::Found(activity),
            Ok(None) => Lookup::Missing,
            Err(e) => {
                warn!(activity_id, error = %e, "Activity lookup failed");
                Lookup::Failed
            }
        }
    }

    /// Proximity lookup with a bounded in-process fallback. Returns the users
    /// and whether the fallback served them; `None` if both paths failed.
    async fn nearby(&self, lat: f64, lon: f64, radius_km: f64) -> Option<(Vec<NearbyUser>, bool)> {
        match self.directory.find_nearby(lat, lon, radius_km).await {
            Ok(users) => return Some((users, false)),
            Err(e) => warn!(
                error = %e,
                degraded = true,
                "Proximity query failed, falling back to location scan"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_directory_degraded();
        }

        let cap = self.config.fallback_candidate_cap;
        match self.directory.users_with_location(cap).await {
            Ok(users) => {
                let scanned = users.len();
                let nearby: Vec<NearbyUser> = users
                    .into_iter()
                    .filter_map(|mut user| {
                        let d = geo::distance_km(lat, lon, user.latitude, user.longitude);
                        (d <= radius_km).then(|| {
                            user.distance_km = Some(d);
                            user
                        })
                    })
                    .collect();
                warn!(
                    degraded = true,
                    scanned,
                    matched = nearby.len(),
                    cap,
                    "Proximity lookup served by fallback scan"
                );
                if scanned >= cap {
                    warn!(cap, "Fallback scan reached its candidate cap, results may be incomplete");
                }
                Some((nearby, true))
            }
            Err(e) => {
                warn!(error = %e, degraded = true, "Fallback location scan failed");
                None
            }
        }
    }

    /// Run a provider call under the deadline and time it.
    async fn call<T, F>(&self, operation: &'static str, deadline: Instant, fut: F) -> Call<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = std::time::Instant::now();
        let call = match timeout_at(deadline, fut).await {
            Ok(Ok(value)) => Call::Done(value),
            Ok(Err(e)) => Call::Failed(e),
            Err(_) => Call::TimedOut,
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_provider_call(operation, started.elapsed().as_secs_f64());
        }
        call
    }

    async fn send_topic(
        &self,
        topic: &str,
        content: NotificationPayload,
        deadline: Instant,
    ) -> Result<DispatchReport> {
        content.validate()?;

        trace!(stage = ?Stage::Sending, topic);
        let outcome = match self
            .call("topic", deadline, self.provider.send_topic(topic, &content))
            .await
        {
            Call::Done(outcome) => outcome,
            Call::Failed(Error::InvalidInput(reason)) => return Err(Error::InvalidInput(reason)),
            Call::Failed(e) => {
                warn!(topic, error = %e, "Topic send failed");
                transport_failure()
            }
            Call::TimedOut => {
                warn!(topic, "Topic send abandoned at dispatch deadline");
                timeout_failure()
            }
        };

        trace!(stage = ?Stage::Aggregating, topic);
        let result = DispatchResult::for_topic(topic, outcome);
        self.record_results(std::slice::from_ref(&result));
        let mut aggregator = ResultAggregator::new(1, 1, false);
        aggregator.record(result);
        Ok(aggregator.finish())
    }

    /// Send `content` to every token. One token goes through `send_one`;
    /// more go through batches.
    async fn send_tokens(
        &self,
        tokens: &[String],
        content: &NotificationPayload,
        deadline: Instant,
    ) -> Vec<DispatchResult> {
        if let [token] = tokens {
            let outcome = match self
                .call("one", deadline, self.provider.send_one(token, content))
                .await
            {
                Call::Done(outcome) => outcome,
                Call::Failed(e) => {
                    warn!(token = %redact(token), error = %e, "Push send failed");
                    transport_failure()
                }
                Call::TimedOut => timeout_failure(),
            };
            return vec![DispatchResult::from_outcome(token, outcome)];
        }

        let limit = self
            .config
            .batch_limit
            .min(self.provider.batch_limit())
            .max(1);
        debug!(
            tokens = tokens.len(),
            batches = tokens.len().div_ceil(limit),
            limit,
            "Sending in batches"
        );

        let mut batches: Vec<(usize, Vec<DispatchResult>)> =
            stream::iter(tokens.chunks(limit).map(<[String]>::to_vec).enumerate())
                .map(|(index, chunk)| async move {
                    (index, self.send_chunk(index, &chunk, content, deadline).await)
                })
                .buffer_unordered(self.config.max_concurrent_batches.max(1))
                .collect()
                .await;
        batches.sort_unstable_by_key(|(index, _)| *index);

        batches
            .into_iter()
            .flat_map(|(_, results)| results)
            .collect()
    }

    async fn send_chunk(
        &self,
        index: usize,
        chunk: &[String],
        content: &NotificationPayload,
        deadline: Instant,
    ) -> Vec<DispatchResult> {
        match self
            .call("batch", deadline, self.provider.send_batch(chunk, content))
            .await
        {
            Call::Done(response) => {
                if response.results.len() != chunk.len() {
                    warn!(
                        batch = index,
                        expected = chunk.len(),
                        received = response.results.len(),
                        "Provider returned a short batch response"
                    );
                }
                let mut outcomes = response.results.into_iter();
                chunk
                    .iter()
                    .map(|token| {
                        let outcome = outcomes.next().unwrap_or_else(|| {
                            SendOutcome::rejected(TRANSPORT_ERROR_CODE, "no result for token")
                        });
                        DispatchResult::from_outcome(token, outcome)
                    })
                    .collect()
            }
            Call::Failed(e) => {
                warn!(
                    batch = index,
                    size = chunk.len(),
                    error = %e,
                    "Batch send failed, recording its recipients as failed"
                );
                chunk
                    .iter()
                    .map(|token| DispatchResult::from_outcome(token, transport_failure()))
                    .collect()
            }
            Call::TimedOut => {
                warn!(
                    batch = index,
                    size = chunk.len(),
                    "Batch abandoned at dispatch deadline"
                );
                chunk
                    .iter()
                    .map(|token| DispatchResult::from_outcome(token, timeout_failure()))
                    .collect()
            }
        }
    }

    fn record_results(&self, results: &[DispatchResult]) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        for result in results {
            match result.category() {
                None => metrics.record_push_sent(result.platform.as_str()),
                Some(category) => {
                    metrics.record_push_failed(result.platform.as_str(), category.as_str())
                }
            }
        }
    }
}

fn activity_not_found() -> Resolution {
    Resolution::Finished(DispatchReport::rejected(
        DispatchReason::ActivityNotFound,
        "Activity not found",
    ))
}

/// Drop the actor and unusable tokens, dedupe tokens, and group what is left
/// by user.
fn filter_recipients(candidates: Vec<Candidate>, actor: Option<&str>) -> Vec<Recipient> {
    let mut seen_tokens = HashSet::new();
    let mut by_user: HashMap<String, usize> = HashMap::new();
    let mut recipients: Vec<Recipient> = Vec::new();

    for candidate in candidates {
        if actor.is_some() && candidate.user_id.as_deref() == actor {
            continue;
        }
        let Some(token) = candidate.token.filter(|t| is_usable(t)) else {
            continue;
        };
        if !seen_tokens.insert(token.clone()) {
            continue;
        }

        let existing = candidate
            .user_id
            .as_ref()
            .and_then(|user| by_user.get(user).copied());
        match existing {
            Some(index) => recipients[index].tokens.push(token),
            None => {
                if let Some(user) = &candidate.user_id {
                    by_user.insert(user.clone(), recipients.len());
                }
                recipients.push(Recipient {
                    user_id: candidate.user_id,
                    tokens: vec![token],
                    distance_km: candidate.distance_km,
                });
            }
        }
    }

    recipients
}
