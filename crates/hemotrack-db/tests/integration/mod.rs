pub mod common;

mod inventory_tests;
mod ledger_tests;
