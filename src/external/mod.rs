pub mod client_order_id;
pub mod connector;
pub mod market_stream;
pub mod router;
pub mod session;
