// Stock counters and their ledger
pub mod ledger;
pub mod stock;

// Reservation lifecycle and sales
pub mod codes;
pub mod expiration;
pub mod inventory;
pub mod reservations;
pub mod sales;

#[cfg(test)]
pub(crate) mod test_support;
