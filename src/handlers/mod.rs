pub mod checkout;
pub mod checkout_links;
pub mod orders;
pub mod payment_webhooks;
