use crate::booking::BookingOrchestrator;
use crate::config::Config;
use crate::notifications::ReceiptDispatcher;
use crate::payments::{ConfirmationListener, PaymentGateway};
use std::sync::Arc;

/// Shared handles for every route
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: BookingOrchestrator,
    pub listener: ConfirmationListener,
    pub gateway: Arc<dyn PaymentGateway>,
    pub dispatcher: ReceiptDispatcher,
}
