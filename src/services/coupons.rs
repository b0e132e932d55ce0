use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::instrument;

use crate::{
    entities::coupon::{self, DiscountType, Entity as CouponEntity},
    errors::ServiceError,
};

/// Read-only coupon collaborator: validity checks and discount
/// computation for checkout. Coupon administration lives elsewhere.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validate the coupon against the cart subtotal and return the
    /// discount amount it grants.
    #[instrument(skip(self))]
    pub async fn resolve_discount(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let normalized = code.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(ServiceError::InvalidCoupon("empty coupon code".to_string()));
        }

        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidCoupon(format!("coupon {} not found", normalized))
            })?;

        if !coupon.active {
            return Err(ServiceError::InvalidCoupon(format!(
                "coupon {} is no longer active",
                coupon.code
            )));
        }
        if let Some(expires_at) = coupon.expires_at {
            if expires_at < Utc::now() {
                return Err(ServiceError::InvalidCoupon(format!(
                    "coupon {} has expired",
                    coupon.code
                )));
            }
        }
        if let Some(min) = coupon.min_order_amount {
            if subtotal < min {
                return Err(ServiceError::InvalidCoupon(format!(
                    "coupon {} requires a minimum order of {}",
                    coupon.code, min
                )));
            }
        }

        Ok(compute_discount(&coupon, subtotal))
    }
}

/// Discount granted by a coupon over a subtotal; never exceeds the
/// subtotal itself.
pub fn compute_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        DiscountType::Percentage => subtotal * coupon.discount_value / Decimal::from(100),
        DiscountType::Fixed => coupon.discount_value,
    };
    raw.min(subtotal).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".into(),
            discount_type,
            discount_value: value,
            min_order_amount: None,
            expires_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_is_proportional() {
        let c = coupon(DiscountType::Percentage, dec!(10));
        assert_eq!(compute_discount(&c, dec!(200.00)), dec!(20.00));
    }

    #[test]
    fn fixed_discount_is_flat() {
        let c = coupon(DiscountType::Fixed, dec!(15.00));
        assert_eq!(compute_discount(&c, dec!(200.00)), dec!(15.00));
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let c = coupon(DiscountType::Fixed, dec!(50.00));
        assert_eq!(compute_discount(&c, dec!(30.00)), dec!(30.00));

        let c = coupon(DiscountType::Percentage, dec!(150));
        assert_eq!(compute_discount(&c, dec!(30.00)), dec!(30.00));
    }

    #[test]
    fn negative_discount_values_clamp_to_zero() {
        let c = coupon(DiscountType::Fixed, dec!(-5.00));
        assert_eq!(compute_discount(&c, dec!(30.00)), Decimal::ZERO);
    }
}
