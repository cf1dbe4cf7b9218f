//! Double-entry posting rules for stock movements

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountRole, AccountType, ReferenceType};

/// Largest debit/credit difference still treated as balanced
pub const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// One line of a posting, booked against a logical account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub role: AccountRole,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    pub fn debit(role: AccountRole, amount: Decimal) -> Self {
        Self {
            role,
            debit: amount,
            credit: Decimal::ZERO,
        }
    }

    pub fn credit(role: AccountRole, amount: Decimal) -> Self {
        Self {
            role,
            debit: Decimal::ZERO,
            credit: amount,
        }
    }

    /// Same line with sides swapped, used for compensating entries
    pub fn reversed(&self) -> Self {
        Self {
            role: self.role,
            debit: self.credit,
            credit: self.debit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error("debits {debit} do not equal credits {credit}")]
    Imbalance { debit: Decimal, credit: Decimal },

    #[error("a posting needs at least two lines, got {0}")]
    TooFewLines(usize),

    #[error("line for {0} has a negative or two-sided amount")]
    MalformedLine(&'static str),
}

/// Check a posting before anything is written; returns the debit total
pub fn ensure_balanced(lines: &[JournalLine]) -> Result<Decimal, PostingError> {
    if lines.len() < 2 {
        return Err(PostingError::TooFewLines(lines.len()));
    }
    for line in lines {
        let one_sided = line.debit.is_zero() || line.credit.is_zero();
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO || !one_sided {
            return Err(PostingError::MalformedLine(line.role.as_str()));
        }
    }

    let debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let credit: Decimal = lines.iter().map(|l| l.credit).sum();
    if (debit - credit).abs() > BALANCE_EPSILON {
        return Err(PostingError::Imbalance { debit, credit });
    }
    Ok(debit)
}

/// Stock-in posting: only purchases and production touch the books
pub fn receipt_lines(reference: ReferenceType, value: Decimal) -> Option<Vec<JournalLine>> {
    let counter = match reference {
        ReferenceType::Purchase => AccountRole::AccountsPayable,
        ReferenceType::Production => AccountRole::ManufacturingExpense,
        _ => return None,
    };
    Some(vec![
        JournalLine::debit(AccountRole::Inventory, value),
        JournalLine::credit(counter, value),
    ])
}

/// Stock-out posting sized to the cost of goods sold
pub fn issue_lines(reference: ReferenceType, cost_of_goods_sold: Decimal) -> Vec<JournalLine> {
    let expense = match reference {
        ReferenceType::ProductionConsumption => AccountRole::ManufacturingExpense,
        _ => AccountRole::Cogs,
    };
    vec![
        JournalLine::debit(expense, cost_of_goods_sold),
        JournalLine::credit(AccountRole::Inventory, cost_of_goods_sold),
    ]
}

/// Manual correction: gains go to revenue, shrinkage to cost of goods sold
pub fn adjustment_lines(increase: bool, value: Decimal) -> Vec<JournalLine> {
    if increase {
        vec![
            JournalLine::debit(AccountRole::Inventory, value),
            JournalLine::credit(AccountRole::InventoryGain, value),
        ]
    } else {
        vec![
            JournalLine::debit(AccountRole::Cogs, value),
            JournalLine::credit(AccountRole::Inventory, value),
        ]
    }
}

/// A row of the chart provisioned for businesses that have none
#[derive(Debug, Clone, Copy)]
pub struct DefaultAccount {
    pub code: &'static str,
    pub name: &'static str,
    pub account_type: AccountType,
    pub role: AccountRole,
}

pub const DEFAULT_CHART: &[DefaultAccount] = &[
    DefaultAccount {
        code: "1300",
        name: "Inventory Asset",
        account_type: AccountType::Asset,
        role: AccountRole::Inventory,
    },
    DefaultAccount {
        code: "2000",
        name: "Accounts Payable",
        account_type: AccountType::Liability,
        role: AccountRole::AccountsPayable,
    },
    DefaultAccount {
        code: "4900",
        name: "Inventory Adjustment Gain",
        account_type: AccountType::Revenue,
        role: AccountRole::InventoryGain,
    },
    DefaultAccount {
        code: "5000",
        name: "Cost of Goods Sold",
        account_type: AccountType::Expense,
        role: AccountRole::Cogs,
    },
    DefaultAccount {
        code: "5100",
        name: "Manufacturing Expense",
        account_type: AccountType::Expense,
        role: AccountRole::ManufacturingExpense,
    },
];
