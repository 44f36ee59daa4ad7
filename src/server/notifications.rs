//! Notification trigger endpoint.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::debug;

use super::AppState;
use crate::events::NotificationEvent;
use crate::push::report::{DispatchReason, DispatchReport};

/// Dispatch one event and return its report.
///
/// Always answers 200; a body that does not parse is reported as
/// `invalid_input` like any other rejected event.
pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NotificationEvent>, JsonRejection>,
) -> Json<DispatchReport> {
    let event = match body {
        Ok(Json(event)) => event,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected malformed event body");
            return Json(DispatchReport::rejected(
                DispatchReason::InvalidInput,
                rejection.body_text(),
            ));
        }
    };

    Json(state.engine.dispatch(&event).await)
}
