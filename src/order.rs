//! # Feature: Order Composer
//!
//! Aggregates the selected quantity, add-ons and delivery method into a priced
//! payload and serializes it to the WhatsApp text sent to the vendor.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use crate::catalog::{extras_for, find_product, tiered_price};
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// How the order reaches the customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    /// Home delivery, charged at the configured shipping cost
    Envio,
    /// Pickup at the shop, free
    Retiro,
}

impl ShippingMethod {
    pub fn cost(&self, shipping_cost: u32) -> u32 {
        match self {
            ShippingMethod::Envio => shipping_cost,
            ShippingMethod::Retiro => 0,
        }
    }
}

/// What the customer picked in the purchase modal
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSelection {
    pub product_id: u32,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub extras: HashMap<String, u32>,
    #[serde(default)]
    pub shipping: Option<ShippingMethod>,
}

fn default_quantity() -> u32 {
    2
}

/// Largest quantity accepted for a single add-on
pub const MAX_ITEM_QUANTITY: u32 = 1000;

fn order_total(subtotal: u32, extra_items: &[ExtraItem], shipping_cost: u32) -> Result<u32> {
    extra_items
        .iter()
        .try_fold(subtotal, |acc, item| acc.checked_add(item.total))
        .and_then(|sum| sum.checked_add(shipping_cost))
        .context("Order total overflows")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainItem {
    pub name: String,
    pub img: String,
    pub quantity: u32,
    pub subtotal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraItem {
    pub name: String,
    pub img: String,
    pub quantity: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipping {
    pub method: ShippingMethod,
    pub cost: u32,
}

/// A fully priced order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub main_item: MainItem,
    pub extra_items: Vec<ExtraItem>,
    pub shipping: Shipping,
    pub total: u32,
}

impl OrderSelection {
    /// Price the selection against the catalog
    pub fn price(&self, shipping_cost: u32) -> Result<OrderPayload> {
        let product = find_product(self.product_id)
            .with_context(|| format!("Unknown product id {}", self.product_id))?;

        let Some(method) = self.shipping else {
            bail!("A shipping method is required");
        };

        let quantity = self.quantity.max(1);
        let subtotal = tiered_price(quantity);

        let available = extras_for(product.id);
        for id in self.extras.keys() {
            if !available.iter().any(|e| &e.id == id) {
                bail!("Unknown extra id '{}'", id);
            }
        }

        // catalog order, zero quantities dropped
        let mut extra_items = Vec::new();
        for extra in &available {
            let Some(&qty) = self.extras.get(&extra.id) else {
                continue;
            };
            if qty == 0 {
                continue;
            }
            if qty > MAX_ITEM_QUANTITY {
                bail!("Quantity {} for '{}' exceeds the limit of {}", qty, extra.name, MAX_ITEM_QUANTITY);
            }
            let total = extra
                .price
                .checked_mul(qty)
                .with_context(|| format!("Price of '{}' overflows", extra.name))?;
            extra_items.push(ExtraItem {
                name: extra.name.clone(),
                img: extra.img.clone(),
                quantity: qty,
                total,
            });
        }

        let shipping = Shipping {
            method,
            cost: method.cost(shipping_cost),
        };
        let total = order_total(subtotal, &extra_items, shipping.cost)?;

        Ok(OrderPayload {
            main_item: MainItem {
                name: product.name,
                img: product.img,
                quantity,
                subtotal,
            },
            extra_items,
            shipping,
            total,
        })
    }
}

impl OrderPayload {
    /// Check the payload shape before it is sent anywhere
    pub fn validate(&self) -> Result<()> {
        if self.main_item.name.trim().is_empty() {
            bail!("Main item name is empty");
        }
        if self.main_item.quantity < 1 {
            bail!("Main item quantity must be at least 1");
        }
        Url::parse(&self.main_item.img)
            .with_context(|| format!("Invalid image URL for '{}'", self.main_item.name))?;

        for item in &self.extra_items {
            if item.quantity < 1 {
                bail!("Extra item '{}' quantity must be at least 1", item.name);
            }
            Url::parse(&item.img).with_context(|| format!("Invalid image URL for '{}'", item.name))?;
        }

        let expected = order_total(self.main_item.subtotal, &self.extra_items, self.shipping.cost)?;
        if expected != self.total {
            bail!("Order total {} does not match its items ({})", self.total, expected);
        }

        Ok(())
    }

    /// The message delivered to the vendor's WhatsApp
    pub fn to_whatsapp_text(&self) -> String {
        let mut message = String::from("*¡Hola Trama Hogar!* 👋\nNuevo pedido de presupuesto:\n\n");

        message.push_str("🧵 *ITEM PRINCIPAL:*\n");
        let _ = writeln!(message, "↳ *{}*", self.main_item.name);
        let _ = writeln!(message, "↳ Cantidad: {}", self.main_item.quantity);
        let _ = write!(message, "↳ Subtotal: ${}\n\n", self.main_item.subtotal);

        if !self.extra_items.is_empty() {
            message.push_str("✨ *ARTÍCULOS EXTRAS:*\n");
            for item in &self.extra_items {
                let _ = writeln!(
                    message,
                    "↳ {} (Cant: {}) - Total item: ${}",
                    item.name, item.quantity, item.total
                );
            }
            message.push('\n');
        }

        message.push_str("🚚 *MÉTODO DE ENTREGA:*\n");
        match self.shipping.method {
            ShippingMethod::Envio => {
                let _ = write!(message, "↳ Envío (Costo: ${})\n\n", self.shipping.cost);
            }
            ShippingMethod::Retiro => message.push_str("↳ Retiro en Local\n\n"),
        }

        let _ = write!(message, "💰 *PRESUPUESTO TOTAL: ${}*", self.total);
        message
    }

    /// One-line summary posted into the chat once the order went out
    pub fn chat_summary(&self) -> String {
        format!(
            "He realizado un pedido de presupuesto para: {}x {}. Total: ${}.",
            self.main_item.quantity, self.main_item.name, self.total
        )
    }
}
