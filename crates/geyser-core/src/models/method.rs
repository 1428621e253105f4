//! Supported stream categories

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A stream category a subscription can be registered under.
///
/// Every variant owns exactly one bucket in the merged
/// [`SubscribeRequest`](crate::SubscribeRequest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Account writes
    Accounts,
    /// Slot progress
    Slots,
    /// Full transactions
    Transactions,
    /// Transaction status only
    TransactionsStatus,
    /// Full blocks
    Blocks,
    /// Block metadata
    BlocksMeta,
    /// Ledger entries
    Entry,
}

impl Method {
    /// All methods, in request field order
    pub const ALL: [Method; 7] = [
        Method::Accounts,
        Method::Slots,
        Method::Transactions,
        Method::TransactionsStatus,
        Method::Blocks,
        Method::BlocksMeta,
        Method::Entry,
    ];

    /// Wire name of the request bucket
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Accounts => "accounts",
            Method::Slots => "slots",
            Method::Transactions => "transactions",
            Method::TransactionsStatus => "transactionsStatus",
            Method::Blocks => "blocks",
            Method::BlocksMeta => "blocksMeta",
            Method::Entry => "entry",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CoreError;

    /// Accepts the wire name (`transactionsStatus`) or its snake_case form
    /// (`transactions_status`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Method::Accounts),
            "slots" => Ok(Method::Slots),
            "transactions" => Ok(Method::Transactions),
            "transactionsStatus" | "transactions_status" => Ok(Method::TransactionsStatus),
            "blocks" => Ok(Method::Blocks),
            "blocksMeta" | "blocks_meta" => Ok(Method::BlocksMeta),
            "entry" => Ok(Method::Entry),
            other => Err(CoreError::InvalidMethod(other.to_string())),
        }
    }
}
