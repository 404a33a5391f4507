//! Static catalog of tracked economic indicators
//!
//! This module contains the list of FRED series refreshed by `refresh --all`
//! together with their display names.

/// An economic indicator tracked by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    /// Human-readable name
    pub name: &'static str,
    /// FRED series identifier
    pub series_id: &'static str,
    /// Short description of the series
    pub description: &'static str,
}

/// Static array of all tracked indicators
pub static INDICATORS: [Indicator; 9] = [
    Indicator {
        name: "GDP",
        series_id: "GDP",
        description: "Gross Domestic Product",
    },
    Indicator {
        name: "Consumer Confidence Index",
        series_id: "UMCSENT",
        description: "U. Michigan Consumer Sentiment",
    },
    Indicator {
        name: "Real GDP Growth Rate",
        series_id: "A191RL1Q225SBEA",
        description: "Real GDP Growth Rate",
    },
    Indicator {
        name: "10-Year Minus 2-Year",
        series_id: "T10Y2Y",
        description: "10-Year Minus 2-Year Treasury Spread",
    },
    Indicator {
        name: "Federal Funds Rate",
        series_id: "FEDFUNDS",
        description: "Federal Funds Rate",
    },
    Indicator {
        name: "10-Year Treasury Yield",
        series_id: "DGS10",
        description: "10-Year Treasury Yield",
    },
    Indicator {
        name: "CPI Inflation",
        series_id: "CPIAUCSL",
        description: "Consumer Price Index",
    },
    Indicator {
        name: "PPI-Final Demand",
        series_id: "PPIACO",
        description: "Producer Price Index",
    },
    Indicator {
        name: "Core CPI (Excl. Food & Energy)",
        series_id: "CPILFESL",
        description: "Core CPI",
    },
];

/// Returns all tracked indicators
pub fn all_indicators() -> &'static [Indicator] {
    &INDICATORS
}

/// Looks up an indicator by FRED id (case-insensitive) or display name
pub fn get_indicator(key: &str) -> Option<&'static Indicator> {
    INDICATORS
        .iter()
        .find(|i| i.series_id.eq_ignore_ascii_case(key) || i.name == key)
}
