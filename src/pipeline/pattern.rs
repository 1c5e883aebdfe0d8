//! Offline field extraction with regular expressions.
//!
//! Handles the common store-visit slide layout:
//!
//! ```text
//! Junco 225699 - CARVALHO RUI BARBOSA
//! Scala Colaborador:
//! Scala FRANCISCA KATIA
//! Superior: NATANAEL FERREIRA
//! Data do Envio: 29/09/2025 10:04:51
//! ```
//!
//! No network, no randomness: the same text always yields the same fields.

use crate::error::SlideError;
use crate::output::{SlideFields, SlideText};
use crate::pipeline::fields::FieldExtractor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_CODE_STORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\D*?(\d+)\s*[-–]\s*(.+)$").unwrap());

static RE_COLABORADOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*colaborador(?:a)?\s*:\s*(.*)$").unwrap());

static RE_SUPERIOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:superior|l[íi]der)\s*:\s*(.+)$").unwrap());

static RE_DATA_ENVIO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^data\s+d[oe]\s+envio\s*:\s*(.+)$").unwrap());

/// Regex-based [`FieldExtractor`] for the standard slide layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternFieldExtractor;

impl PatternFieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`FieldExtractor::extract_fields`].
    pub fn extract(&self, slide: &SlideText) -> Result<SlideFields, SlideError> {
        let lines: Vec<&str> = slide
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut fields = SlideFields::default();

        for (i, line) in lines.iter().enumerate() {
            if fields.codigo_parceiro.is_empty() && !line.contains(':') {
                if let Some(c) = RE_CODE_STORE.captures(line) {
                    fields.codigo_parceiro = c[1].to_string();
                    fields.nome_loja = c[2].trim().to_string();
                    continue;
                }
            }

            if fields.colaborador.is_empty() {
                if let Some(c) = RE_COLABORADOR.captures(line) {
                    let brand = c[1].trim();
                    let inline = c[2].trim();
                    // A following labelled line ("Superior: ...") is not a name.
                    let value = if inline.is_empty() {
                        lines
                            .get(i + 1)
                            .copied()
                            .filter(|next| !next.contains(':'))
                            .unwrap_or_default()
                    } else {
                        inline
                    };
                    fields.colaborador = strip_brand(value, brand).to_string();
                    continue;
                }
            }

            if fields.superior.is_empty() {
                if let Some(c) = RE_SUPERIOR.captures(line) {
                    fields.superior = c[1].trim().to_string();
                    continue;
                }
            }

            if fields.data_envio.is_empty() {
                if let Some(c) = RE_DATA_ENVIO.captures(line) {
                    fields.data_envio = c[1].trim().to_string();
                }
            }
        }

        if fields.is_empty() {
            return Err(SlideError::NoFieldsFound {
                slide: slide.slide_number,
            });
        }
        Ok(fields)
    }
}

#[async_trait]
impl FieldExtractor for PatternFieldExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract_fields(&self, slide: &SlideText) -> Result<SlideFields, SlideError> {
        self.extract(slide)
    }
}

/// `"Scala FRANCISCA KATIA"` with brand `"Scala"` → `"FRANCISCA KATIA"`.
fn strip_brand<'a>(value: &'a str, brand: &str) -> &'a str {
    if brand.is_empty() {
        return value;
    }
    match value.get(..brand.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(brand) => value[brand.len()..].trim(),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(text: &str) -> SlideText {
        SlideText {
            slide_number: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn standard_layout() {
        let f = PatternFieldExtractor
            .extract(&slide(
                "Junco 225699 - CARVALHO RUI BARBOSA\nScala Colaborador:\nScala FRANCISCA KATIA\nSuperior: NATANAEL FERREIRA\nData do Envio: 29/09/2025 10:04:51",
            ))
            .unwrap();
        assert_eq!(f.codigo_parceiro, "225699");
        assert_eq!(f.nome_loja, "CARVALHO RUI BARBOSA");
        assert_eq!(f.colaborador, "FRANCISCA KATIA");
        assert_eq!(f.superior, "NATANAEL FERREIRA");
        assert_eq!(f.data_envio, "29/09/2025 10:04:51");
    }

    #[test]
    fn inline_colaborador_and_lider_label() {
        let f = PatternFieldExtractor
            .extract(&slide("Bravo 1042 – PRAIA\nBravo Colaborador: Bravo JOSE\nLíder: MARIA"))
            .unwrap();
        assert_eq!(f.codigo_parceiro, "1042");
        assert_eq!(f.nome_loja, "PRAIA");
        assert_eq!(f.colaborador, "JOSE");
        assert_eq!(f.superior, "MARIA");
        assert_eq!(f.data_envio, "");
    }

    #[test]
    fn empty_colaborador_does_not_swallow_next_label() {
        let f = PatternFieldExtractor
            .extract(&slide(
                "Junco 225699 - CARVALHO RUI BARBOSA\nScala Colaborador:\nSuperior: NATANAEL\nData do Envio: 29/09/2025 10:04:51",
            ))
            .unwrap();
        assert_eq!(f.colaborador, "");
        assert_eq!(f.superior, "NATANAEL");
        assert_eq!(f.data_envio, "29/09/2025 10:04:51");

        let f = PatternFieldExtractor
            .extract(&slide("Scala Colaborador:\nData do Envio: 01/10/2025 08:00:00"))
            .unwrap();
        assert_eq!(f.colaborador, "");
        assert_eq!(f.data_envio, "01/10/2025 08:00:00");
    }

    #[test]
    fn date_line_is_not_mistaken_for_code() {
        let f = PatternFieldExtractor
            .extract(&slide("Data do Envio: 01/10/2025 08:00:00"))
            .unwrap();
        assert_eq!(f.codigo_parceiro, "");
        assert_eq!(f.data_envio, "01/10/2025 08:00:00");
    }

    #[test]
    fn unrelated_text_yields_no_fields() {
        let err = PatternFieldExtractor
            .extract(&slide("Obrigado!\nPerguntas?"))
            .unwrap_err();
        assert!(matches!(err, SlideError::NoFieldsFound { slide: 1 }));
    }

    #[tokio::test]
    async fn trait_path_matches_sync_path() {
        let s = slide("Junco 7 - LOJA");
        let via_trait = PatternFieldExtractor.extract_fields(&s).await.unwrap();
        assert_eq!(via_trait, PatternFieldExtractor.extract(&s).unwrap());
    }
}
