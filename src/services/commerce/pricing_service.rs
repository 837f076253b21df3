use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Orders whose items total strictly more than this ship free.
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(500);
/// Flat shipping charge below the threshold.
pub const FLAT_SHIPPING_PRICE: Decimal = dec!(50);
/// Tax applied to the items total.
pub const TAX_RATE: Decimal = dec!(0.18);

/// Price summary of a cart or order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 600.0)]
    pub items_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 0.0)]
    pub shipping_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 108.0)]
    pub tax_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 708.0)]
    pub total_price: Decimal,
}

impl PriceBreakdown {
    /// Amount sent to the payment gateway: the total rounded to two places.
    pub fn gateway_amount(&self) -> Decimal {
        round_currency(self.total_price)
    }
}

/// Rounds to two decimal places, halves away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes item, shipping, tax and total prices from `(unit price, quantity)` lines.
///
/// Arithmetic is exact; nothing is rounded here.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use storefront_api::services::commerce::pricing_service::calculate_pricing;
///
/// let prices = calculate_pricing([(dec!(100), 2)]);
/// assert_eq!(prices.total_price, dec!(286));
/// ```
pub fn calculate_pricing<I>(lines: I) -> PriceBreakdown
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    let items_price: Decimal = lines
        .into_iter()
        .map(|(unit_price, quantity)| unit_price * Decimal::from(quantity))
        .sum();

    let shipping_price = if items_price > FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        FLAT_SHIPPING_PRICE
    };
    let tax_price = items_price * TAX_RATE;

    PriceBreakdown {
        items_price,
        shipping_price,
        tax_price,
        total_price: items_price + shipping_price + tax_price,
    }
}
