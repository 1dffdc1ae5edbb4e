//! Scripted collaborators for the payment gateway and notifications

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use salonpass_core::{
    ChargeRequest, GatewayError, GatewayResponse, Notification, Notifier, NotifyError,
    PaymentGateway,
};

/// Gateway that replays queued responses, capturing when the queue is empty
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<GatewayResponse, String>>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

#[allow(dead_code)]
impl ScriptedGateway {
    pub fn push(&self, response: GatewayResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn decline_next(&self, reason: &str) {
        self.push(GatewayResponse::Failed {
            reason: reason.to_string(),
            reference: Some("ch_declined".to_string()),
        });
    }

    pub fn fail_next(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<GatewayResponse, GatewayError> {
        let reference = format!("ch_{}", request.payment_id.0.simple());
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Ok(GatewayResponse::Captured { reference }),
        }
    }
}

/// Notifier that keeps everything it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(Notification::kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}
