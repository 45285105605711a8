use std::borrow::Cow;
use std::fmt::Display;
use std::str::{self, FromStr};

pub fn curie_to_num(curie: &str) -> (Option<ControlledVocabulary>, Option<u32>) {
    let mut parts = curie.split(':');
    let prefix = match parts.next() {
        Some(v) => v
            .parse::<ControlledVocabulary>()
            .unwrap_or(ControlledVocabulary::Unknown)
            .as_option(),
        None => None,
    };
    if let Some(k) = parts.next() {
        match k.parse() {
            Ok(v) => (prefix, Some(v)),
            Err(_) => (prefix, None),
        }
    } else {
        (prefix, None)
    }
}

/// A controlled vocabulary or user-defined parameter attached to an XML
/// element as a `cvParam` or `userParam`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
    pub accession: Option<u32>,
    pub controlled_vocabulary: Option<ControlledVocabulary>,
    pub unit: Unit,
}

impl Param {
    pub fn new() -> Param {
        Param {
            ..Default::default()
        }
    }

    pub fn coerce<T: str::FromStr>(&self) -> Result<T, T::Err> {
        self.value.parse::<T>()
    }

    pub fn is_controlled(&self) -> bool {
        self.accession.is_some()
    }

    pub fn curie(&self) -> Option<String> {
        if !self.is_controlled() {
            None
        } else {
            let cv = &self.controlled_vocabulary?;
            let acc = self.accession?;
            Some(format!("{}:{:07}", cv.prefix(), acc))
        }
    }

    pub fn with_unit_t(mut self, unit: &Unit) -> Param {
        self.unit = *unit;
        self
    }
}

/// The ontologies an imzML document draws its terms from.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ControlledVocabulary {
    MS,
    UO,
    IMS,
    Unknown,
}

const MS_CV: &str = "MS";
const UO_CV: &str = "UO";
const IMS_CV: &str = "IMS";

impl ControlledVocabulary {
    pub fn prefix(&self) -> Cow<'static, str> {
        match &self {
            Self::MS => Cow::Borrowed(MS_CV),
            Self::UO => Cow::Borrowed(UO_CV),
            Self::IMS => Cow::Borrowed(IMS_CV),
            Self::Unknown => panic!("Cannot encode unknown CV"),
        }
    }

    pub fn as_option(&self) -> Option<Self> {
        match self {
            Self::Unknown => None,
            _ => Some(*self),
        }
    }

    pub fn param<A: AsRef<str>, S: Into<String>>(&self, accession: A, name: S) -> Param {
        let mut param = Param::new();
        param.controlled_vocabulary = Some(*self);
        param.name = name.into();
        if let Some(nb) = accession.as_ref().split(':').nth(1) {
            param.accession = Some(nb.parse().unwrap_or_else(|_| {
                panic!(
                    "Expected accession to be numeric, got {}",
                    accession.as_ref()
                )
            }));
        }
        param
    }

    pub fn param_val<S: Into<String>, A: AsRef<str>, V: ToString>(
        &self,
        accession: A,
        name: S,
        value: V,
    ) -> Param {
        let mut param = self.param(accession, name);
        param.value = value.to_string();
        param
    }
}

#[derive(Debug, Clone)]
pub enum ControlledVocabularyResolutionError {}

impl Display for ControlledVocabularyResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(format!("{:?}", self).as_str())
    }
}

impl FromStr for ControlledVocabulary {
    type Err = ControlledVocabularyResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MS" | "PSI-MS" => Ok(Self::MS),
            "UO" => Ok(Self::UO),
            "IMS" => Ok(Self::IMS),
            _ => Ok(Self::Unknown),
        }
    }
}

/// Units that a term's value might have. Only the units this format's
/// required fields can carry are represented.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    MZ,
    DetectorCounts,
    Micrometer,

    #[default]
    Unknown,
}

impl Unit {
    pub fn for_param(&self) -> (&'static str, &'static str) {
        match self {
            Self::MZ => ("MS:1000040", "m/z"),
            Self::DetectorCounts => ("MS:1000131", "number of detector counts"),
            Self::Micrometer => ("UO:0000017", "micrometer"),
            _ => ("", ""),
        }
    }

    pub fn from_name(name: &str) -> Unit {
        match name {
            "m/z" => Self::MZ,
            "number of detector counts" => Self::DetectorCounts,
            "micrometer" => Self::Micrometer,
            _ => Unit::Unknown,
        }
    }

    pub fn from_accession(acc: &str) -> Unit {
        match acc {
            "MS:1000040" => Self::MZ,
            "MS:1000131" => Self::DetectorCounts,
            "UO:0000017" => Self::Micrometer,
            _ => Unit::Unknown,
        }
    }
}
