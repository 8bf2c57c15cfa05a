//! In-process paper venue for CLI demonstrations. Real connectors (Binance,
//! Zerodha, ...) are out of scope (`dispatcher::VenueAdapter`'s own doc
//! comment); this adapter fills every order immediately at the caller's
//! limit price, or at a fixed reference price for market orders.

use std::sync::atomic::{AtomicU64, Ordering};

use common::{Decimal, OrderStatus, Side, VenueError};
use dispatcher::{VenueAck, VenueAdapter, VenueInfo};

pub struct PaperAdapter {
    name: String,
    next_id: AtomicU64,
}

impl PaperAdapter {
    pub fn new(name: String) -> Self {
        Self { name, next_id: AtomicU64::new(1) }
    }
}

impl VenueAdapter for PaperAdapter {
    fn submit(&self, _symbol: &str, _side: Side, quantity: Decimal, limit_price: Option<Decimal>) -> Result<VenueAck, VenueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(VenueAck {
            venue_order_id: format!("{}-{id}", self.name),
            status: OrderStatus::Filled,
            filled_quantity: quantity,
            avg_fill_price: limit_price.unwrap_or(Decimal::parse("100").expect("valid literal")),
        })
    }

    fn query_status(&self, venue_order_id: &str) -> Result<VenueAck, VenueError> {
        Err(VenueError::OrderRejected(format!("unknown order {venue_order_id}")))
    }

    fn cancel(&self, _symbol: &str, _venue_order_id: &str) -> Result<(), VenueError> {
        Ok(())
    }

    fn info(&self) -> VenueInfo {
        VenueInfo { name: self.name.clone(), testnet: true, supported_symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()] }
    }
}
