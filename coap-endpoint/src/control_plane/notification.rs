use crate::message::{Request, Response};

/// Invoked for every fresh notification matching an observe request sent by
/// this endpoint. Runs on the protocol stage.
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, request: &Request, response: &Response);
}
