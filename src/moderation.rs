//! Message-moderation filters for `buyer, product, review, image` records.
//!
//! A record that has fewer fields than a filter needs is passed through
//! unchanged rather than dropped.

use std::collections::HashSet;
use std::io::BufRead;
use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::filter::Filter;
use crate::record::Record;

/// Stock buyer-product pairs.
pub const DEFAULT_BUYERS: &[&str] = &[
    "John - Laptop",
    "Mary - Phone",
    "Ann - BigMac",
    "Emanuel - Hyundai",
    "Razvan - Jas39",
    "Bob - Notebook",
    "Bogdan - Parrot",
    "Radu - Dog",
    "Lucian - Shoes",
    "Mihai - Coke",
    "Calin - Pants",
    "Stefan - Pen",
    "Toni - Guitar",
    "Luca - Football",
    "Andrei - Car",
    "Flavius - Shirt",
    "Marian - Outlet",
    "Peter - Tractor",
    "Piedone - Shawarma",
    "Matei - DVD",
    "Vasile - Wine",
    "Marioara - Cupcake",
    "Ghita - Toolbox",
    "Miriam - Mask",
    "Alex - MacBook",
    "Nicu - Sandwich",
    "Laura - Fish",
    "Sebastian - Flower",
    "Daniel - Bonsai",
    "Terry - Silver",
];

const PROFANITY_MARKERS: &[&str] = &["@#$%"];
const POLITICAL_MARKERS: &[&str] = &["+++", "---"];

const BUYER_FIELD: usize = 0;
const PRODUCT_FIELD: usize = 1;
const REVIEW_FIELD: usize = 2;
const IMAGE_FIELD: usize = 3;

/// BUYER - keeps records whose `buyer - product` pair is registered.
#[derive(Debug, Clone)]
pub struct BuyerCheck {
    pairs: HashSet<String>,
}

impl BuyerCheck {
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(Into::into).collect(),
        }
    }

    /// Check against [`DEFAULT_BUYERS`].
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUYERS.iter().copied())
    }

    /// Load pairs from a reader, one `Name - Product` per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut pairs = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            pairs.insert(line.to_string());
        }
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, buyer: &str, product: &str) -> bool {
        self.pairs
            .contains(&format!("{} - {}", buyer.trim(), product.trim()))
    }
}

impl Filter for BuyerCheck {
    fn apply(&self, record: &Record) -> Option<Record> {
        let fields = record.fields();
        if fields.len() <= PRODUCT_FIELD {
            debug!("buyer-check: passing malformed record \"{record}\"");
            return Some(record.clone());
        }
        self.contains(fields[BUYER_FIELD], fields[PRODUCT_FIELD])
            .then(|| record.clone())
    }

    fn name(&self) -> &str {
        "buyer-check"
    }
}

/// SCREEN - drops records containing any of its markers.
#[derive(Debug, Clone)]
pub struct KeywordScreen {
    name: String,
    markers: Vec<String>,
}

impl KeywordScreen {
    pub fn new<I, S>(name: impl Into<String>, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn profanity() -> Self {
        Self::new("profanity-screen", PROFANITY_MARKERS.iter().copied())
    }

    pub fn political() -> Self {
        Self::new("political-screen", POLITICAL_MARKERS.iter().copied())
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Filter for KeywordScreen {
    fn apply(&self, record: &Record) -> Option<Record> {
        if self.markers.iter().any(|m| record.contains(m)) {
            None
        } else {
            Some(record.clone())
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// NORMALIZE - lower-cases the image field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer;

impl Filter for FieldNormalizer {
    fn apply(&self, record: &Record) -> Option<Record> {
        match record.field(IMAGE_FIELD) {
            Some(image) => record.with_field(IMAGE_FIELD, &image.to_lowercase()),
            None => {
                debug!("field-normalizer: passing malformed record \"{record}\"");
                Some(record.clone())
            }
        }
    }

    fn name(&self) -> &str {
        "field-normalizer"
    }
}

/// STRIP - removes every occurrence of `http`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStripper;

impl Filter for LinkStripper {
    fn apply(&self, record: &Record) -> Option<Record> {
        Some(record.replace("http", ""))
    }

    fn name(&self) -> &str {
        "link-stripper"
    }
}

/// Sentiment of a review by letter case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    /// More uppercase than lowercase letters.
    Positive,
    /// More lowercase than uppercase letters.
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn of(text: &str) -> Self {
        let (upper, lower) = text.chars().fold((0usize, 0usize), |(u, l), c| {
            if c.is_uppercase() {
                (u + 1, l)
            } else if c.is_lowercase() {
                (u, l + 1)
            } else {
                (u, l)
            }
        });
        match upper.cmp(&lower) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Sentiment::Positive => '+',
            Sentiment::Negative => '-',
            Sentiment::Neutral => '=',
        }
    }
}

/// SENTIMENT - appends a sentiment tag to the review field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentTagger;

impl Filter for SentimentTagger {
    fn apply(&self, record: &Record) -> Option<Record> {
        match record.field(REVIEW_FIELD) {
            Some(review) if !review.is_empty() => {
                let tagged = format!("{review}{}", Sentiment::of(review).tag());
                record.with_field(REVIEW_FIELD, &tagged)
            }
            _ => Some(record.clone()),
        }
    }

    fn name(&self) -> &str {
        "sentiment-tagger"
    }
}

/// The six moderation stages in their canonical order.
pub fn standard_chain(buyers: BuyerCheck) -> Vec<Arc<dyn Filter>> {
    vec![
        Arc::new(buyers),
        Arc::new(KeywordScreen::profanity()),
        Arc::new(KeywordScreen::political()),
        Arc::new(FieldNormalizer),
        Arc::new(LinkStripper),
        Arc::new(SentimentTagger),
    ]
}
