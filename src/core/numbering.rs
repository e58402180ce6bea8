use super::error::CfdiError;

/// `Serie` / `Folio` pair handed out by a [`FolioSequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folio {
    pub series: String,
    pub folio: String,
}

/// Gapless folio sequence within one series.
///
/// SAT does not mandate folios, but most issuers number their CFDIs per
/// series ("A", "NC" for credit notes, ...) without gaps so that the
/// accounting side can detect missing documents. This struct tracks the
/// last folio handed out.
#[derive(Debug, Clone)]
pub struct FolioSequence {
    series: String,
    next: u64,
    zero_pad: usize,
}

impl FolioSequence {
    /// Create a new sequence starting at 1.
    pub fn new(series: impl Into<String>) -> Self {
        Self::starting_at(series, 1)
    }

    /// Create a sequence continuing from a given folio.
    pub fn starting_at(series: impl Into<String>, next: u64) -> Self {
        Self {
            series: series.into(),
            next,
            zero_pad: 0,
        }
    }

    /// Zero-pad folios to `width` digits (default: no padding).
    pub fn with_padding(mut self, width: usize) -> Self {
        self.zero_pad = width;
        self
    }

    /// Hand out the next folio.
    pub fn next_folio(&mut self) -> Folio {
        let folio = self.peek();
        self.next += 1;
        folio
    }

    /// Preview the next folio without consuming it.
    pub fn peek(&self) -> Folio {
        Folio {
            series: self.series.clone(),
            folio: format!("{:0>width$}", self.next, width = self.zero_pad),
        }
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    /// The next folio number, unformatted.
    pub fn next_raw(&self) -> u64 {
        self.next
    }

    /// Switch to another series, restarting at 1.
    pub fn change_series(&mut self, series: impl Into<String>) -> Result<(), CfdiError> {
        let series = series.into();
        if series.trim().is_empty() {
            return Err(CfdiError::Builder("series must not be blank".into()));
        }
        if series == self.series {
            return Err(CfdiError::Builder(format!(
                "sequence already uses series {series}"
            )));
        }
        self.series = series;
        self.next = 1;
        Ok(())
    }
}
