use crate::entities::quote::{Material, PrintQuality};
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

const MARGIN_RATE: Decimal = dec!(0.20);
const REFERENCE_LAYER_MM: Decimal = dec!(0.28);
const MAX_LAYER_MM: Decimal = dec!(1.0);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("unknown material: {0}")]
    UnknownMaterial(String),
    #[error("unknown quality: {0}")]
    UnknownQuality(String),
    #[error("volume must be greater than zero")]
    InvalidVolume,
    #[error("print time cannot be negative")]
    InvalidTime,
    #[error("infill must be between 0 and 100")]
    InvalidInfill,
    #[error("layer height must be greater than 0 and at most 1mm")]
    InvalidLayerHeight,
    #[error("computed price {0} is not positive")]
    NonPositivePrice(Decimal),
}

impl From<PricingError> for ServiceError {
    fn from(err: PricingError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl FromStr for Material {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLA" => Ok(Material::Pla),
            "PETG" => Ok(Material::Petg),
            "TPU" => Ok(Material::Tpu),
            _ => Err(PricingError::UnknownMaterial(s.to_string())),
        }
    }
}

impl FromStr for PrintQuality {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(PrintQuality::Draft),
            "standard" => Ok(PrintQuality::Standard),
            "high" | "quality" => Ok(PrintQuality::High),
            _ => Err(PricingError::UnknownQuality(s.to_string())),
        }
    }
}

impl Material {
    /// ARS per cm³
    pub fn coefficient(self) -> Decimal {
        match self {
            Material::Pla => dec!(2.2),
            Material::Petg => dec!(2.8),
            Material::Tpu => dec!(3.1),
        }
    }
}

impl PrintQuality {
    /// ARS per hour of machine time
    pub fn hourly_rate(self) -> Decimal {
        match self {
            PrintQuality::Draft => dec!(12),
            PrintQuality::Standard => dec!(18),
            PrintQuality::High => dec!(25),
        }
    }
}

/// Print job parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceInput {
    pub volume_cm3: Decimal,
    pub minutes: i64,
    pub material: Material,
    pub quality: PrintQuality,
    pub infill_pct: i32,
    pub layer_height_mm: Decimal,
}

impl PriceInput {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.volume_cm3 <= Decimal::ZERO {
            return Err(PricingError::InvalidVolume);
        }
        if self.minutes < 0 {
            return Err(PricingError::InvalidTime);
        }
        if !(0..=100).contains(&self.infill_pct) {
            return Err(PricingError::InvalidInfill);
        }
        if self.layer_height_mm <= Decimal::ZERO || self.layer_height_mm > MAX_LAYER_MM {
            return Err(PricingError::InvalidLayerHeight);
        }
        Ok(())
    }
}

/// Contributing terms of a computed price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    /// Material cost (volume × material coefficient)
    pub volume: Decimal,
    /// Machine time cost
    pub time: Decimal,
    pub infill_factor: Decimal,
    pub layer_adj: Decimal,
    pub margin: Decimal,
    pub total: Decimal,
}

/// Prices a print job. Pure and deterministic; a total of zero or less is rejected.
pub fn calculate(input: &PriceInput) -> Result<PriceBreakdown, PricingError> {
    input.validate()?;

    let volume = input.volume_cm3 * input.material.coefficient();
    let time = Decimal::from(input.minutes) * input.quality.hourly_rate() / dec!(60);
    let infill_factor = Decimal::ONE + Decimal::from(input.infill_pct) / dec!(200);
    let layer_adj = (REFERENCE_LAYER_MM - input.layer_height_mm) * dec!(10);

    let subtotal = (volume + time) * infill_factor + layer_adj;
    let margin = subtotal * MARGIN_RATE;
    let total = (subtotal + margin).round_dp(2);
    if total <= Decimal::ZERO {
        return Err(PricingError::NonPositivePrice(total));
    }

    Ok(PriceBreakdown {
        volume,
        time,
        infill_factor,
        layer_adj,
        margin,
        total,
    })
}
