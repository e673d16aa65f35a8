pub mod classes;
pub mod core;
pub mod ledger;
pub mod results;
pub mod roster;
pub mod subjects;
