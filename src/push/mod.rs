//! Push transport, payload construction and result aggregation.

pub mod fcm;
pub mod payload;
pub mod provider;
pub mod report;
pub mod retry;
pub mod token;
