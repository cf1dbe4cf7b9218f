//! Common types used across the stock engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of business document that caused a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Purchase,
    PurchaseReturn,
    Production,
    ProductionConsumption,
    Sale,
    SalesReturn,
    Adjustment,
    Transfer,
    OpeningStock,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Purchase => "purchase",
            ReferenceType::PurchaseReturn => "purchase_return",
            ReferenceType::Production => "production",
            ReferenceType::ProductionConsumption => "production_consumption",
            ReferenceType::Sale => "sale",
            ReferenceType::SalesReturn => "sales_return",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::Transfer => "transfer",
            ReferenceType::OpeningStock => "opening_stock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(ReferenceType::Purchase),
            "purchase_return" => Some(ReferenceType::PurchaseReturn),
            "production" => Some(ReferenceType::Production),
            "production_consumption" => Some(ReferenceType::ProductionConsumption),
            "sale" => Some(ReferenceType::Sale),
            "sales_return" => Some(ReferenceType::SalesReturn),
            "adjustment" => Some(ReferenceType::Adjustment),
            "transfer" => Some(ReferenceType::Transfer),
            "opening_stock" => Some(ReferenceType::OpeningStock),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Originating document of a stock mutation (type + id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub kind: ReferenceType,
    pub id: Uuid,
}

impl Reference {
    pub fn new(kind: ReferenceType, id: Uuid) -> Self {
        Self { kind, id }
    }
}

/// Condition bucket a location quantity sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockState {
    #[default]
    Sellable,
    Damaged,
    InTransit,
    Quarantine,
}

impl StockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockState::Sellable => "sellable",
            StockState::Damaged => "damaged",
            StockState::InTransit => "in_transit",
            StockState::Quarantine => "quarantine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sellable" => Some(StockState::Sellable),
            "damaged" => Some(StockState::Damaged),
            "in_transit" => Some(StockState::InTransit),
            "quarantine" => Some(StockState::Quarantine),
            _ => None,
        }
    }
}

/// Direction and cause of a movement row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    TransferOut,
    TransferIn,
    AdjustmentIn,
    AdjustmentOut,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::AdjustmentIn => "adjustment_in",
            MovementType::AdjustmentOut => "adjustment_out",
        }
    }

    /// Whether rows of this type carry a positive quantity change
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            MovementType::In | MovementType::TransferIn | MovementType::AdjustmentIn
        )
    }
}

/// Lifecycle status of a serialized unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    Available,
    Sold,
    Returned,
}

impl SerialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialStatus::Available => "available",
            SerialStatus::Sold => "sold",
            SerialStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SerialStatus::Available),
            "sold" => Some(SerialStatus::Sold),
            "returned" => Some(SerialStatus::Returned),
            _ => None,
        }
    }

    /// A returned unit is back on the shelf and can be issued again
    pub fn is_in_stock(&self) -> bool {
        matches!(self, SerialStatus::Available | SerialStatus::Returned)
    }
}

/// Logical account a journal line is booked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Inventory,
    Cogs,
    AccountsPayable,
    ManufacturingExpense,
    InventoryGain,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Inventory => "inventory",
            AccountRole::Cogs => "cogs",
            AccountRole::AccountsPayable => "ap",
            AccountRole::ManufacturingExpense => "manufacturing_expense",
            AccountRole::InventoryGain => "inventory_gain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inventory" => Some(AccountRole::Inventory),
            "cogs" => Some(AccountRole::Cogs),
            "ap" => Some(AccountRole::AccountsPayable),
            "manufacturing_expense" => Some(AccountRole::ManufacturingExpense),
            "inventory_gain" => Some(AccountRole::InventoryGain),
            _ => None,
        }
    }
}

/// Chart-of-accounts classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        }
    }
}
