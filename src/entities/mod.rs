pub mod checkout_token;
pub mod exchange_rate;
pub mod herb;
pub mod herb_price;
pub mod order;
pub mod patient;
pub mod recommendation;
pub mod recommendation_item;
pub mod reconciliation_task;
