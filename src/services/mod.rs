pub mod checkout_links;
pub mod notifications;
pub mod orders;
pub mod payment_sessions;
pub mod pricing;

pub use checkout_links::CheckoutLinkService;
pub use notifications::NotificationService;
pub use orders::OrderService;
pub use payment_sessions::PaymentSessionService;
pub use pricing::PricingService;
