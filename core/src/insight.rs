//! Insight templates: plain-language sentences about anomalies and band
//! transitions, rendered per locale. Pure text; no store access here.
//!
//! confidence = clamp(1 − σ / sigma_scale, 0, 1)
//!   ≥ 0.75 high, ≥ 0.50 moderate, otherwise low.

use crate::{
    anomaly::{AnomalyKind, Severity},
    band::StatusBand,
    types::{format_date, Locale, ScoreDate, Series},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    AnomalyOpen,
    AnomalyResolved,
    BandChange,
}

impl InsightKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnomalyOpen     => "anomaly_open",
            Self::AnomalyResolved => "anomaly_resolved",
            Self::BandChange      => "band_change",
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InsightKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly_open"     => Ok(Self::AnomalyOpen),
            "anomaly_resolved" => Ok(Self::AnomalyResolved),
            "band_change"      => Ok(Self::BandChange),
            other              => Err(format!("unknown insight kind '{other}'")),
        }
    }
}

/// What a sentence is about.
#[derive(Debug, Clone, PartialEq)]
pub enum InsightSubject {
    Anomaly {
        series:    Series,
        date:      ScoreDate,
        kind:      AnomalyKind,
        severity:  Severity,
        delta_pct: f64,
        actual:    f64,
        expected:  f64,
    },
    Resolved {
        series:      Series,
        date:        ScoreDate,
        kind:        AnomalyKind,
        resolved_on: ScoreDate,
    },
    BandChange {
        series:         Series,
        date:           ScoreDate,
        from:           StatusBand,
        to:             StatusBand,
        previous_score: f64,
        score:          f64,
    },
}

impl InsightSubject {
    pub fn kind(&self) -> InsightKind {
        match self {
            Self::Anomaly { .. }    => InsightKind::AnomalyOpen,
            Self::Resolved { .. }   => InsightKind::AnomalyResolved,
            Self::BandChange { .. } => InsightKind::BandChange,
        }
    }

    pub fn series(&self) -> Series {
        match self {
            Self::Anomaly { series, .. }
            | Self::Resolved { series, .. }
            | Self::BandChange { series, .. } => *series,
        }
    }

    pub fn date(&self) -> ScoreDate {
        match self {
            Self::Anomaly { date, .. }
            | Self::Resolved { date, .. }
            | Self::BandChange { date, .. } => *date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    High,
    Moderate,
    Low,
}

impl ConfidenceLabel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn text(&self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::En, Self::High)     => "high",
            (Locale::En, Self::Moderate) => "moderate",
            (Locale::En, Self::Low)      => "low",
            (Locale::Es, Self::High)     => "alta",
            (Locale::Es, Self::Moderate) => "moderada",
            (Locale::Es, Self::Low)      => "baja",
        }
    }
}

pub fn confidence(sigma: f64, sigma_scale: f64) -> f64 {
    if sigma_scale <= 0.0 || !sigma.is_finite() {
        return 0.0;
    }
    (1.0 - sigma / sigma_scale).clamp(0.0, 1.0)
}

pub fn series_label(series: Series, locale: Locale) -> &'static str {
    use crate::types::Pillar;
    match (locale, series) {
        (Locale::En, Series::Pillar(Pillar::Finance)) => "Finance",
        (Locale::En, Series::Pillar(Pillar::Health))  => "Health",
        (Locale::En, Series::Pillar(Pillar::Ai))      => "AI",
        (Locale::En, Series::Pillar(Pillar::Menu))    => "Menu",
        (Locale::En, Series::Composite)               => "Governance score",
        (Locale::Es, Series::Pillar(Pillar::Finance)) => "Finanzas",
        (Locale::Es, Series::Pillar(Pillar::Health))  => "Salud",
        (Locale::Es, Series::Pillar(Pillar::Ai))      => "IA",
        (Locale::Es, Series::Pillar(Pillar::Menu))    => "Menú",
        (Locale::Es, Series::Composite)               => "Puntuación de gobernanza",
    }
}

fn kind_label(kind: AnomalyKind, locale: Locale) -> &'static str {
    match (locale, kind) {
        (Locale::En, AnomalyKind::SuddenDrop)           => "sudden drop",
        (Locale::En, AnomalyKind::SuddenSpike)          => "sudden spike",
        (Locale::En, AnomalyKind::SustainedDecline)     => "sustained decline",
        (Locale::En, AnomalyKind::SustainedImprovement) => "sustained improvement",
        (Locale::En, AnomalyKind::BaselineUnavailable)  => "unmeasurable deviation",
        (Locale::Es, AnomalyKind::SuddenDrop)           => "caída repentina",
        (Locale::Es, AnomalyKind::SuddenSpike)          => "alza repentina",
        (Locale::Es, AnomalyKind::SustainedDecline)     => "descenso sostenido",
        (Locale::Es, AnomalyKind::SustainedImprovement) => "mejora sostenida",
        (Locale::Es, AnomalyKind::BaselineUnavailable)  => "desviación no medible",
    }
}

fn severity_label(severity: Severity, locale: Locale) -> &'static str {
    match (locale, severity) {
        (Locale::En, s)                  => s.name(),
        (Locale::Es, Severity::Low)      => "baja",
        (Locale::Es, Severity::Medium)   => "media",
        (Locale::Es, Severity::High)     => "alta",
        (Locale::Es, Severity::Critical) => "crítica",
    }
}

fn band_label(band: StatusBand, locale: Locale) -> &'static str {
    match (locale, band) {
        (Locale::En, b)                    => b.name(),
        (Locale::Es, StatusBand::Excellent) => "excelente",
        (Locale::Es, StatusBand::Good)      => "bueno",
        (Locale::Es, StatusBand::Fair)      => "regular",
        (Locale::Es, StatusBand::Poor)      => "deficiente",
    }
}

/// One decimal; Spanish uses a decimal comma.
fn number(value: f64, locale: Locale) -> String {
    let s = format!("{value:.1}");
    match locale {
        Locale::En => s,
        Locale::Es => s.replace('.', ","),
    }
}

fn signed_pct(value: f64, locale: Locale) -> String {
    let s = format!("{value:+.1}%");
    match locale {
        Locale::En => s,
        Locale::Es => s.replace('.', ","),
    }
}

/// Render one sentence for `subject` in `locale`.
pub fn render(subject: &InsightSubject, confidence: f64, locale: Locale) -> String {
    let label = ConfidenceLabel::from_confidence(confidence).text(locale);
    let who = series_label(subject.series(), locale);

    match (subject, locale) {
        (InsightSubject::Anomaly { kind: AnomalyKind::BaselineUnavailable, date, actual, .. }, Locale::En) => format!(
            "{who}: the expected baseline for {} is zero, so the deviation of the actual score {} cannot be measured. Confidence: {label}.",
            format_date(*date),
            number(*actual, locale),
        ),
        (InsightSubject::Anomaly { kind: AnomalyKind::BaselineUnavailable, date, actual, .. }, Locale::Es) => format!(
            "{who}: la línea base esperada para {} es cero, por lo que la desviación de la puntuación real {} no se puede medir. Confianza: {label}.",
            format_date(*date),
            number(*actual, locale),
        ),
        (InsightSubject::Anomaly { kind, severity, delta_pct, actual, expected, date, .. }, Locale::En) => format!(
            "{who}: {} of {} on {} (actual {} vs expected {}), {} severity. Confidence: {label}.",
            kind_label(*kind, locale),
            signed_pct(*delta_pct, locale),
            format_date(*date),
            number(*actual, locale),
            number(*expected, locale),
            severity_label(*severity, locale),
        ),
        (InsightSubject::Anomaly { kind, severity, delta_pct, actual, expected, date, .. }, Locale::Es) => format!(
            "{who}: {} de {} el {} (real {} frente a {} esperado), severidad {}. Confianza: {label}.",
            kind_label(*kind, locale),
            signed_pct(*delta_pct, locale),
            format_date(*date),
            number(*actual, locale),
            number(*expected, locale),
            severity_label(*severity, locale),
        ),
        (InsightSubject::Resolved { kind, date, resolved_on, .. }, Locale::En) => format!(
            "{who}: the {} from {} resolved on {} after consecutive calm days. Confidence: {label}.",
            kind_label(*kind, locale),
            format_date(*date),
            format_date(*resolved_on),
        ),
        (InsightSubject::Resolved { kind, date, resolved_on, .. }, Locale::Es) => format!(
            "{who}: la {} del {} se resolvió el {} tras días consecutivos de calma. Confianza: {label}.",
            kind_label(*kind, locale),
            format_date(*date),
            format_date(*resolved_on),
        ),
        (InsightSubject::BandChange { from, to, previous_score, score, .. }, Locale::En) => format!(
            "{who} {} from {} to {} ({} to {}). Confidence: {label}.",
            if to.rank() > from.rank() { "improved" } else { "declined" },
            band_label(*from, locale),
            band_label(*to, locale),
            number(*previous_score, locale),
            number(*score, locale),
        ),
        (InsightSubject::BandChange { from, to, previous_score, score, .. }, Locale::Es) => format!(
            "{who} {} de {} a {} ({} a {}). Confianza: {label}.",
            if to.rank() > from.rank() { "mejoró" } else { "empeoró" },
            band_label(*from, locale),
            band_label(*to, locale),
            number(*previous_score, locale),
            number(*score, locale),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pillar;
    use chrono::NaiveDate;

    #[test]
    fn confidence_is_clipped() {
        assert_eq!(confidence(0.0, 20.0), 1.0);
        assert_eq!(confidence(40.0, 20.0), 0.0);
        assert!((confidence(5.0, 20.0) - 0.75).abs() < 1e-12);
        assert_eq!(ConfidenceLabel::from_confidence(0.75), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_confidence(0.5), ConfidenceLabel::Moderate);
        assert_eq!(ConfidenceLabel::from_confidence(0.49), ConfidenceLabel::Low);
    }

    #[test]
    fn spanish_uses_decimal_comma() {
        let subject = InsightSubject::Anomaly {
            series:    Series::Pillar(Pillar::Finance),
            date:      NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            kind:      AnomalyKind::SuddenDrop,
            severity:  Severity::Critical,
            delta_pct: -25.0,
            actual:    60.0,
            expected:  80.0,
        };
        let es = render(&subject, 0.9, Locale::Es);
        assert!(es.starts_with("Finanzas: caída repentina de -25,0%"), "{es}");
        assert!(es.contains("Confianza: alta"));
        let en = render(&subject, 0.9, Locale::En);
        assert!(en.contains("sudden drop of -25.0%"), "{en}");
        assert!(en.contains("critical severity"));
    }
}
