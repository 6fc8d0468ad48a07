// Services
//
// Integrations with the outside world used by the automation engine.

pub mod dispatch;

pub use dispatch::{LoggingDispatcher, WebhookDispatcher};
