pub mod notifications;
pub mod orders;
pub mod root;
pub mod webhooks;
