//! Therapeutic candidates and their identity hash.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::digest::{short_digest, DigestResult};

/// Therapeutic modality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Antibody,
    Nanobody,
    Peptide,
    SmallMolecule,
    Protein,
    Bispecific,
    #[serde(rename = "antibody_drug_conjugate")]
    Adc,
    Other,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Antibody => "antibody",
            Modality::Nanobody => "nanobody",
            Modality::Peptide => "peptide",
            Modality::SmallMolecule => "small_molecule",
            Modality::Protein => "protein",
            Modality::Bispecific => "bispecific",
            Modality::Adc => "antibody_drug_conjugate",
            Modality::Other => "other",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| format!("unknown modality: {s}"))
    }
}

/// Short content hash joining a candidate to its results and audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateHash(String);

impl CandidateHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CandidateHash> for String {
    fn from(hash: CandidateHash) -> Self {
        hash.0
    }
}

/// A therapeutic candidate submitted for screening.
///
/// Created by the caller; the pipeline and its modules only ever borrow it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub name: String,
    /// Amino-acid sequence, or chemical descriptor for small molecules.
    pub sequence: Option<String>,
    pub modality: Modality,
    pub target: String,
    #[serde(default)]
    pub target_sequence: Option<String>,
    #[serde(default)]
    pub structure_file: Option<PathBuf>,
    #[serde(default)]
    pub heavy_chain: Option<String>,
    #[serde(default)]
    pub light_chain: Option<String>,
    #[serde(default)]
    pub smiles: Option<String>,
    #[serde(default)]
    pub fasta_file: Option<PathBuf>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, modality: Modality, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: None,
            modality,
            target: target.into(),
            target_sequence: None,
            structure_file: None,
            heavy_chain: None,
            light_chain: None,
            smiles: None,
            fasta_file: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Small-molecule candidate; the SMILES string doubles as the sequence.
    pub fn from_smiles(
        smiles: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let smiles = smiles.into();
        let mut candidate = Self::new(name, Modality::SmallMolecule, target);
        candidate.sequence = Some(smiles.clone());
        candidate.smiles = Some(smiles);
        candidate
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    pub fn with_chains(mut self, heavy: Option<String>, light: Option<String>) -> Self {
        self.heavy_chain = heavy;
        self.light_chain = light;
        self
    }

    pub fn with_structure_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.structure_file = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Deterministic identity over (name, sequence, modality, target).
    pub fn try_hash(&self) -> DigestResult<CandidateHash> {
        let identity = json!({
            "name": self.name,
            "sequence": self.sequence,
            "modality": self.modality.as_str(),
            "target": self.target,
        });
        Ok(CandidateHash(short_digest(&identity)?))
    }

    /// Infallible form of [`Candidate::try_hash`]: the identity holds only
    /// strings, so canonicalization cannot hit a non-finite number.
    pub fn hash(&self) -> CandidateHash {
        self.try_hash()
            .unwrap_or_else(|_| CandidateHash(String::from("0000000000000000")))
    }

    pub fn is_biologic(&self) -> bool {
        matches!(
            self.modality,
            Modality::Antibody
                | Modality::Nanobody
                | Modality::Protein
                | Modality::Bispecific
                | Modality::Adc
        )
    }

    pub fn is_peptide(&self) -> bool {
        self.modality == Modality::Peptide
    }

    pub fn is_small_molecule(&self) -> bool {
        self.modality == Modality::SmallMolecule
    }

    /// The sequence a module should score for this modality.
    pub fn primary_sequence(&self) -> Option<&str> {
        match self.modality {
            Modality::SmallMolecule => self.smiles.as_deref().or(self.sequence.as_deref()),
            Modality::Antibody => self
                .heavy_chain
                .as_deref()
                .or(self.light_chain.as_deref())
                .or(self.sequence.as_deref()),
            _ => self.sequence.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn antibody() -> Candidate {
        Candidate::new("AB-001", Modality::Antibody, "PD-L1").with_sequence("EVQLVESGGGLVQ")
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(antibody().hash(), antibody().hash());
        assert_eq!(antibody().hash().as_str().len(), 16);
    }

    #[test]
    fn hash_ignores_metadata_and_structure() {
        let plain = antibody();
        let decorated = antibody()
            .with_metadata("campaign", serde_json::json!("q3"))
            .with_structure_file("/tmp/ab001.pdb");
        assert_eq!(plain.hash(), decorated.hash());
    }

    #[test]
    fn hash_changes_with_identity_fields() {
        let base = antibody();
        let retargeted = Candidate::new("AB-001", Modality::Antibody, "PD-1")
            .with_sequence("EVQLVESGGGLVQ");
        let remodality =
            Candidate::new("AB-001", Modality::Nanobody, "PD-L1").with_sequence("EVQLVESGGGLVQ");
        assert_ne!(base.hash(), retargeted.hash());
        assert_ne!(base.hash(), remodality.hash());
    }

    #[test]
    fn modality_serializes_snake_case() {
        let json = serde_json::to_string(&Modality::Adc).expect("serialize");
        assert_eq!(json, "\"antibody_drug_conjugate\"");
        assert_eq!("small_molecule".parse::<Modality>(), Ok(Modality::SmallMolecule));
        assert!("virus".parse::<Modality>().is_err());
    }

    #[test]
    fn primary_sequence_by_modality() {
        let ab = Candidate::new("AB", Modality::Antibody, "X")
            .with_sequence("SEQ")
            .with_chains(None, Some("LIGHT".to_string()));
        assert_eq!(ab.primary_sequence(), Some("LIGHT"));

        let ab = ab.with_chains(Some("HEAVY".to_string()), Some("LIGHT".to_string()));
        assert_eq!(ab.primary_sequence(), Some("HEAVY"));

        let sm = Candidate::from_smiles("CCO", "ethanol", "X");
        assert_eq!(sm.primary_sequence(), Some("CCO"));
        assert!(sm.is_small_molecule());
        assert!(!sm.is_biologic());

        let pep = Candidate::new("P1", Modality::Peptide, "X");
        assert_eq!(pep.primary_sequence(), None);
        assert!(pep.is_peptide());
    }
}
