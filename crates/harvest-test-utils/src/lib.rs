//! Shared test fixtures for the harvester crates: a fake browser driver, a
//! scripted fetcher, and an on-disk temp-SQLite store.

pub mod fake_driver;
pub mod fake_fetcher;
pub mod temp_store;

pub use fake_driver::FakeDriver;
pub use fake_fetcher::ScriptedFetcher;
pub use temp_store::TempStore;
