//! Checkout input: cart lines and the buyer's contact snapshot.
//!
//! Both are validated once, at order creation. A value of either type that
//! exists has already passed validation, so the rest of the engine never
//! re-checks cart shape or contact fields.

use serde::{Deserialize, Serialize};

use super::catalog::ServiceId;
use super::email::{Email, EmailError};
use super::money::{Currency, DualPrice};
use super::status::Locale;

/// Reasons checkout input is rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("cart has more than {max} lines")]
    TooManyItems { max: usize },
    #[error("cart line {line}: name is empty")]
    EmptyItemName { line: usize },
    #[error("cart line {line}: price is negative")]
    NegativePrice { line: usize },
    #[error("invalid email: {0}")]
    Email(#[from] EmailError),
    #[error("name cannot be empty")]
    EmptyName,
    #[error("name must be at most {max} characters")]
    NameTooLong { max: usize },
}

/// One purchased service, priced in both currencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub service_id: ServiceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub price: DualPrice,
}

/// A validated, non-empty list of cart lines.
///
/// Deserialization runs the same checks as [`Cart::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CartItem>", into = "Vec<CartItem>")]
pub struct Cart(Vec<CartItem>);

impl Cart {
    /// Upper bound on lines per order.
    pub const MAX_ITEMS: usize = 50;

    /// Validate cart lines.
    ///
    /// Line numbers in errors are 1-based.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn new(items: Vec<CartItem>) -> Result<Self, ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::EmptyCart);
        }
        if items.len() > Self::MAX_ITEMS {
            return Err(ValidationError::TooManyItems {
                max: Self::MAX_ITEMS,
            });
        }

        for (idx, item) in items.iter().enumerate() {
            let line = idx + 1;
            if item.name.trim().is_empty() {
                return Err(ValidationError::EmptyItemName { line });
            }
            if !item.price.is_non_negative() {
                return Err(ValidationError::NegativePrice { line });
            }
        }

        Ok(Self(items))
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.0
    }

    /// Sum of all line prices.
    #[must_use]
    pub fn totals(&self) -> DualPrice {
        self.0.iter().map(|item| item.price).sum()
    }
}

impl TryFrom<Vec<CartItem>> for Cart {
    type Error = ValidationError;

    fn try_from(items: Vec<CartItem>) -> Result<Self, Self::Error> {
        Self::new(items)
    }
}

impl From<Cart> for Vec<CartItem> {
    fn from(cart: Cart) -> Self {
        cart.0
    }
}

/// Contact details captured with a guest order.
///
/// Later copied into the buyer's profile when the account is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub email: Email,
    pub name: String,
    pub phone: Option<String>,
    pub locale: Locale,
    pub preferred_currency: Currency,
}

impl GuestContact {
    /// Maximum length of the buyer's name.
    pub const MAX_NAME_LENGTH: usize = 200;

    /// Validate and normalize the required contact fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Email`] for a malformed address, or a name
    /// error when the trimmed name is empty or too long.
    pub fn new(email: &str, name: &str) -> Result<Self, ValidationError> {
        let email = Email::parse(email)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.chars().count() > Self::MAX_NAME_LENGTH {
            return Err(ValidationError::NameTooLong {
                max: Self::MAX_NAME_LENGTH,
            });
        }

        Ok(Self {
            email,
            name: name.to_owned(),
            phone: None,
            locale: Locale::default(),
            preferred_currency: Currency::default(),
        })
    }

    /// Attach a phone number; blank input clears it.
    #[must_use]
    pub fn with_phone(mut self, phone: Option<&str>) -> Self {
        self.phone = phone
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);
        self
    }

    #[must_use]
    pub const fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    #[must_use]
    pub const fn with_currency(mut self, currency: Currency) -> Self {
        self.preferred_currency = currency;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn item(id: &str, myr: i64) -> CartItem {
        CartItem {
            service_id: ServiceId::parse(id).unwrap(),
            name: format!("Service {id}"),
            category: None,
            price: DualPrice::new(Decimal::new(myr, 0), Decimal::new(myr * 22, 2)),
        }
    }

    #[test]
    fn test_empty_cart_rejected() {
        assert_eq!(Cart::new(vec![]), Err(ValidationError::EmptyCart));
    }

    #[test]
    fn test_too_many_items_rejected() {
        let items = (0..=Cart::MAX_ITEMS).map(|i| item(&format!("s{i}"), 10)).collect();
        assert!(matches!(
            Cart::new(items),
            Err(ValidationError::TooManyItems { max: 50 })
        ));
    }

    #[test]
    fn test_negative_price_reports_line() {
        let mut bad = item("b", 10);
        bad.price.myr = Decimal::new(-5, 0);
        assert_eq!(
            Cart::new(vec![item("a", 10), bad]),
            Err(ValidationError::NegativePrice { line: 2 })
        );
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut bad = item("a", 10);
        bad.name = "  ".into();
        assert_eq!(
            Cart::new(vec![bad]),
            Err(ValidationError::EmptyItemName { line: 1 })
        );
    }

    #[test]
    fn test_totals_sum_every_line() {
        let cart = Cart::new(vec![item("a", 800), item("b", 450), item("a", 800)]).unwrap();
        assert_eq!(cart.totals().myr, Decimal::new(2050, 0));
    }

    #[test]
    fn test_deserialize_validates() {
        assert!(serde_json::from_str::<Cart>("[]").is_err());
        let json = r#"[{"service_id":"feng_shui_residential","name":"Feng Shui","price":{"myr":"800","usd":"170"}}]"#;
        let cart: Cart = serde_json::from_str(json).unwrap();
        assert_eq!(cart.items().len(), 1);

        let blank_id = r#"[{"service_id":"  ","name":"Feng Shui","price":{"myr":"800","usd":"170"}}]"#;
        assert!(serde_json::from_str::<Cart>(blank_id).is_err());
    }

    #[test]
    fn test_contact_normalizes() {
        let contact = GuestContact::new(" Ming@Example.com ", "  Ming Li ")
            .unwrap()
            .with_phone(Some("  "))
            .with_locale(Locale::Cn)
            .with_currency(Currency::Usd);
        assert_eq!(contact.email.as_str(), "ming@example.com");
        assert_eq!(contact.name, "Ming Li");
        assert_eq!(contact.phone, None);
        assert_eq!(contact.locale, Locale::Cn);
    }

    #[test]
    fn test_contact_rejects_bad_input() {
        assert!(matches!(
            GuestContact::new("not-an-email", "Ming"),
            Err(ValidationError::Email(_))
        ));
        assert_eq!(
            GuestContact::new("ming@example.com", " "),
            Err(ValidationError::EmptyName)
        );
    }
}
