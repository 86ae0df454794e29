//! # Feature: Catalog & Tiered Pricing
//!
//! Static product and add-on lists plus the quantity-bracket price lookup used
//! by the order composer.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Offer other products as extras (`p-{id}`) alongside the add-on catalog
//! - 1.0.0: Initial product list, extras catalog and tiered pricing

use serde::{Deserialize, Serialize};

/// Unit price of every product, also the single-item price bracket
pub const UNIT_PRICE: u32 = 195;

/// A product sold on the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u32,
    pub name: String,
    pub img: String,
    pub price: u32,
    pub image_hint: String,
}

/// An add-on that can be ordered next to the main product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extra {
    pub id: String,
    pub name: String,
    pub price: u32,
    pub img: String,
    pub suggested: bool,
    pub image_hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Product> for Extra {
    fn from(product: &Product) -> Self {
        Extra {
            id: format!("p-{}", product.id),
            name: product.name.clone(),
            price: product.price,
            img: product.img.clone(),
            suggested: false,
            image_hint: product.image_hint.clone(),
            description: None,
        }
    }
}

fn image_url(seed: &str) -> String {
    format!("https://picsum.photos/seed/{seed}/600/600")
}

// (id, name, image hint)
const PRODUCT_ROWS: [(u32, &str, &str); 9] = [
    (1, "Individual Trama Natural", "woven placemat"),
    (2, "Servilletas Estampa", "printed napkins"),
    (3, "Cesta Panera Soft", "bread basket"),
    (4, "Individual Gris Nórdico", "grey placemat"),
    (5, "Set Cocina Rustik", "kitchen textiles"),
    (6, "Servilleta Bordado", "embroidered napkin"),
    (7, "Centro de Mesa Sol", "table centerpiece"),
    (8, "Portacubiertos Deco", "cutlery holder"),
    (9, "Camino Costa", "table runner"),
];

// (id, name, price, suggested, image hint)
const EXTRA_ROWS: [(&str, &str, u32, bool, &str); 4] = [
    ("x1", "Anillos para servilletas (8p)", 292, true, "napkin rings"),
    ("x2", "Pegatinas 'Gracias' (500p)", 85, true, "thank you stickers"),
    ("x3", "Pétalos de rosa (1008p)", 95, true, "rose petals"),
    ("x4", "Cinta de Raso Decorativa", 120, false, "satin ribbon"),
];

/// All products, in display order
pub fn products() -> Vec<Product> {
    PRODUCT_ROWS
        .iter()
        .map(|(id, name, hint)| Product {
            id: *id,
            name: name.to_string(),
            img: image_url(&format!("product-{id}")),
            price: UNIT_PRICE,
            image_hint: hint.to_string(),
        })
        .collect()
}

/// The add-on catalog
pub fn extras() -> Vec<Extra> {
    EXTRA_ROWS
        .iter()
        .enumerate()
        .map(|(i, (id, name, price, suggested, hint))| Extra {
            id: id.to_string(),
            name: name.to_string(),
            price: *price,
            img: image_url(&format!("extra-{}", i + 1)),
            suggested: *suggested,
            image_hint: hint.to_string(),
            description: None,
        })
        .collect()
}

pub fn find_product(id: u32) -> Option<Product> {
    products().into_iter().find(|p| p.id == id)
}

/// Everything that can be added next to `product_id`: the extras catalog
/// followed by every other product
pub fn extras_for(product_id: u32) -> Vec<Extra> {
    let mut all = extras();
    all.extend(
        products()
            .iter()
            .filter(|p| p.id != product_id)
            .map(Extra::from),
    );
    all
}

/// Extras shown when no AI suggestions are available
pub fn default_suggestions() -> Vec<Extra> {
    extras().into_iter().filter(|e| e.suggested).collect()
}

/// Total price for `qty` units of a main product, chosen by bracket
pub fn tiered_price(qty: u32) -> u32 {
    if qty >= 6 {
        return 1100;
    }
    if qty >= 4 {
        return 750;
    }
    if qty >= 2 {
        return 390;
    }
    UNIT_PRICE * qty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiered_price_brackets() {
        assert_eq!(tiered_price(1), 195);
        assert_eq!(tiered_price(2), 390);
        assert_eq!(tiered_price(3), 390);
        assert_eq!(tiered_price(4), 750);
        assert_eq!(tiered_price(5), 750);
        assert_eq!(tiered_price(6), 1100);
        assert_eq!(tiered_price(7), 1100);
        assert_eq!(tiered_price(40), 1100);
    }

    #[test]
    fn test_tiered_price_zero_quantity() {
        assert_eq!(tiered_price(0), 0);
    }

    #[test]
    fn test_extras_for_excludes_selected_product() {
        let all = extras_for(3);
        assert_eq!(all.len(), extras().len() + products().len() - 1);
        assert!(all.iter().any(|e| e.id == "p-1"));
        assert!(!all.iter().any(|e| e.id == "p-3"));
        // catalog extras come first
        assert_eq!(all[0].id, "x1");
        assert!(all.iter().filter(|e| e.id.starts_with("p-")).all(|e| !e.suggested));
    }

    #[test]
    fn test_default_suggestions_are_flagged_extras() {
        let ids: Vec<_> = default_suggestions().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["x1", "x2", "x3"]);
    }

    #[test]
    fn test_find_product() {
        assert_eq!(find_product(9).map(|p| p.name), Some("Camino Costa".to_string()));
        assert!(find_product(42).is_none());
    }
}
