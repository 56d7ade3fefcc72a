//! Typed helpers for standard commerce events
//!
//! [`crate::Tracker::track_ecommerce`] takes any event type and a free-form
//! data map. These types build that map for the commerce events the
//! collector understands, so callers do not hand-assemble JSON.

use serde::Serialize;
use serde_json::Value;

use crate::events::Params;

/// Standard commerce event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcommerceAction {
    ViewItem,
    AddToCart,
    RemoveFromCart,
    BeginCheckout,
    Purchase,
    Refund,
}

impl EcommerceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EcommerceAction::ViewItem => "view_item",
            EcommerceAction::AddToCart => "add_to_cart",
            EcommerceAction::RemoveFromCart => "remove_from_cart",
            EcommerceAction::BeginCheckout => "begin_checkout",
            EcommerceAction::Purchase => "purchase",
            EcommerceAction::Refund => "refund",
        }
    }
}

impl std::str::FromStr for EcommerceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view_item" => Ok(EcommerceAction::ViewItem),
            "add_to_cart" => Ok(EcommerceAction::AddToCart),
            "remove_from_cart" => Ok(EcommerceAction::RemoveFromCart),
            "begin_checkout" => Ok(EcommerceAction::BeginCheckout),
            "purchase" => Ok(EcommerceAction::Purchase),
            "refund" => Ok(EcommerceAction::Refund),
            _ => Err(format!("unknown ecommerce action: {}", s)),
        }
    }
}

/// A product line
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Item {
    pub item_id: String,
    pub item_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl Item {
    pub fn new(item_id: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            item_name: item_name.into(),
            ..Default::default()
        }
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// Order-level fields shared by the commerce events
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EcommerceData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
}

impl EcommerceData {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Data map for [`crate::Tracker::track_ecommerce`]
    pub fn to_params(&self) -> Params {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Params::new(),
        }
    }
}
