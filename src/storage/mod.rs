pub mod db;
pub mod migrations;
pub mod orders;
pub mod products;
pub mod settings;

pub use db::Db;
pub use orders::{
    ClaimKey, InsertOutcome, LegacyRow, NewCanonicalOrder, Order, OrderStore, OriginTable,
    RemoteStateUpdate, SqliteOrderStore,
};
pub use products::{CatalogReplaceSummary, ProductStore, StoredProduct};
pub use settings::{ProviderSettingRecord, ProviderSettingsStore};
