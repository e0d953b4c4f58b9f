pub mod currency;
pub mod dispatch;
pub mod commission;
pub mod export;
