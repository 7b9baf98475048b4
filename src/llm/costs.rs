//! Per-token pricing used for cost logging.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD price per token for a model name.
///
/// Unknown models cost zero; the figure is only ever logged.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let per_million = match model {
        m if m.starts_with("gpt-4o-mini") => (dec!(0.15), dec!(0.60)),
        m if m.starts_with("gpt-4o") => (dec!(2.50), dec!(10.00)),
        m if m.starts_with("gpt-3.5-turbo") => (dec!(0.50), dec!(1.50)),
        m if m.contains("haiku") => (dec!(0.80), dec!(4.00)),
        m if m.contains("sonnet") => (dec!(3.00), dec!(15.00)),
        m if m.contains("opus") => (dec!(15.00), dec!(75.00)),
        _ => (Decimal::ZERO, Decimal::ZERO),
    };
    let million = dec!(1_000_000);
    (per_million.0 / million, per_million.1 / million)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_price() {
        let (input, output) = model_cost("gpt-4o-mini-2024-07-18");
        assert_eq!(input * dec!(1_000_000), dec!(0.15));
        assert_eq!(output * dec!(1_000_000), dec!(0.60));
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(model_cost("local-llama"), (Decimal::ZERO, Decimal::ZERO));
    }
}
