//! Notification letter rendering.
//!
//! The content is fixed by the letter fields and the letterhead; only the
//! layout lives here.

pub mod pdf;

use chrono::{Datelike, NaiveDate};

use crate::config::Letterhead;
use crate::error::{CaseError, SetupError};
use crate::pipeline::types::{Document, Letter, LetterRenderer};

use self::pdf::{Font, Logo, PdfPage};

const MONTHS: [&str; 12] = [
    "januar",
    "februar",
    "marts",
    "april",
    "maj",
    "juni",
    "juli",
    "august",
    "september",
    "oktober",
    "november",
    "december",
];

const BODY_OPENING: &str = "Din anmodning om flytning til nedenstående adresse er blevet godkendt.";

/// Long Danish date, e.g. `"1. januar 2024"`.
pub fn danish_long_date(date: NaiveDate) -> String {
    format!("{}. {} {}", date.day(), MONTHS[date.month0() as usize], date.year())
}

/// Lines of the letter body, top to bottom.
pub fn body_lines(letter: &Letter, letterhead: &Letterhead) -> Vec<String> {
    let mut lines = vec![BODY_OPENING.to_string(), String::new()];
    lines.extend(letter.address.lines().map(str::to_string));
    lines.extend([
        String::new(),
        "Flyttedato:".to_string(),
        letter.move_date.clone(),
        String::new(),
        "Med venlig hilsen".to_string(),
        letterhead.signature.clone(),
    ]);
    lines
}

fn recipient_lines(letter: &Letter) -> Vec<String> {
    std::iter::once(letter.recipient_name.clone())
        .chain(letter.address.lines().map(str::to_string))
        .collect()
}

fn validate(letter: &Letter) -> Result<(), CaseError> {
    let missing = [
        ("recipient name", &letter.recipient_name),
        ("address", &letter.address),
        ("case identifier", &letter.case_identifier),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    match missing {
        Some((field, _)) => Err(CaseError::Data(format!("letter has no {field}"))),
        None => Ok(()),
    }
}

/// Renders letters as a single A4 PDF page.
pub struct PdfLetterRenderer {
    letterhead: Letterhead,
    file_name: String,
    logo: Option<Logo>,
}

impl PdfLetterRenderer {
    /// A renderer without a logo.
    pub fn new(letterhead: Letterhead, file_name: impl Into<String>) -> Self {
        Self {
            letterhead,
            file_name: file_name.into(),
            logo: None,
        }
    }

    /// A renderer with the logo named by `letterhead.logo_path`, if any.
    pub fn from_letterhead(
        letterhead: Letterhead,
        file_name: impl Into<String>,
    ) -> Result<Self, SetupError> {
        let logo = letterhead.logo_path.as_deref().map(Logo::load).transpose()?;
        let renderer = Self::new(letterhead, file_name);
        Ok(match logo {
            Some(logo) => renderer.with_logo(logo),
            None => renderer,
        })
    }

    pub fn with_logo(mut self, logo: Logo) -> Self {
        self.logo = Some(logo);
        self
    }
}

impl LetterRenderer for PdfLetterRenderer {
    fn render(&self, letter: &Letter) -> Result<Document, CaseError> {
        validate(letter)?;

        let letterhead = &self.letterhead;
        let mut page = PdfPage::new();
        if let Some(logo) = &self.logo {
            page.image(logo, 155.0, 267.0, 49.0, 25.0);
        }
        page.text_block(24.0, 247.0, Font::Regular, 10.0, &recipient_lines(letter));
        page.text_block(
            24.0,
            211.0,
            Font::Regular,
            10.0,
            &[format!("Den {}", danish_long_date(letter.letter_date))],
        );
        page.text_block(
            110.0,
            211.0,
            Font::Regular,
            10.0,
            &[format!("Flyttesagsnr.: {}", letter.case_identifier)],
        );
        page.text_block(
            160.0,
            213.0,
            Font::Bold,
            12.0,
            &[letterhead.organisation.as_str(), letterhead.unit.as_str()],
        );
        page.text_block(160.0, 192.0, Font::Bold, 8.0, &letterhead.contact_lines);
        page.text_block(24.0, 195.0, Font::Regular, 10.0, &body_lines(letter, letterhead));

        Ok(Document {
            file_name: self.file_name.clone(),
            content_type: "application/pdf".to_string(),
            bytes: page.finish(),
        })
    }
}
