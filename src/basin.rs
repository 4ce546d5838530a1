//! Basin setup: which region, satellite and species a run is about.
//!
//! Construction never fails. Configurations the estimators cannot honour
//! (several molecules, inventory labels that do not pair up with the
//! molecules) are logged as errors and reported by `is_well_formed`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::logging::{FitLogger, LogFacade};

/// Trace species with an IME product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Molecule {
    No2,
    Nh3,
    Other(String),
}

impl Molecule {
    /// Molecular weight in kg/mol, when known.
    pub fn molecular_weight(&self) -> Option<f64> {
        match self {
            Molecule::No2 => Some(0.046),
            Molecule::Nh3 => Some(0.017),
            Molecule::Other(_) => None,
        }
    }

    /// Convert an emission rate from mol/s to kg/s.
    pub fn to_mass_rate(&self, mol_per_s: f64) -> Option<f64> {
        self.molecular_weight().map(|w| mol_per_s * w)
    }
}

impl FromStr for Molecule {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "NO2" => Molecule::No2,
            "NH3" => Molecule::Nh3,
            _ => Molecule::Other(s.trim().to_string()),
        })
    }
}

impl fmt::Display for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Molecule::No2 => write!(f, "NO2"),
            Molecule::Nh3 => write!(f, "NH3"),
            Molecule::Other(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinSetup {
    pub name: String,
    pub satellite: String,
    pub molecules: Vec<Molecule>,
    pub inventory_labels: Vec<String>,
}

impl BasinSetup {
    pub fn new<L: FitLogger>(
        name: impl Into<String>,
        satellite: impl Into<String>,
        molecules: Vec<Molecule>,
        inventory_labels: Vec<String>,
        logger: &L,
    ) -> Self {
        let setup = Self {
            name: name.into(),
            satellite: satellite.into(),
            molecules,
            inventory_labels,
        };
        logger.info(&format!(
            "basin {} ({}), molecules: {}",
            setup.name,
            setup.satellite,
            setup.molecule_names()
        ));
        for problem in setup.problems() {
            logger.error(&problem);
        }
        setup
    }

    /// Same as `new`, logging through the `log` facade.
    pub fn with_default_logger(
        name: impl Into<String>,
        satellite: impl Into<String>,
        molecules: Vec<Molecule>,
    ) -> Self {
        Self::new(name, satellite, molecules, Vec::new(), &LogFacade)
    }

    pub fn is_well_formed(&self) -> bool {
        self.problems().is_empty()
    }

    /// The species all estimators work on.
    pub fn primary_molecule(&self) -> Option<&Molecule> {
        self.molecules.first()
    }

    /// Molecular weight per requested molecule (`None` when unknown).
    pub fn molecular_weights(&self) -> Vec<Option<f64>> {
        self.molecules.iter().map(Molecule::molecular_weight).collect()
    }

    fn molecule_names(&self) -> String {
        self.molecules
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.molecules.len() > 1 {
            out.push("Only one molecule is supported per basin setup!".to_string());
        }
        if !self.inventory_labels.is_empty() && self.inventory_labels.len() != self.molecules.len() {
            out.push(format!(
                "{} inventory labels given for {} molecules, the counts have to match",
                self.inventory_labels.len(),
                self.molecules.len()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::{Level, RecordingLogger};

    #[test]
    fn parses_known_and_unknown_molecules() {
        assert_eq!("no2".parse::<Molecule>().unwrap(), Molecule::No2);
        assert_eq!("NH3".parse::<Molecule>().unwrap(), Molecule::Nh3);
        let co: Molecule = "CO".parse().unwrap();
        assert_eq!(co, Molecule::Other("CO".to_string()));
        assert_eq!(co.molecular_weight(), None);
        assert_eq!(co.to_string(), "CO");
    }

    #[test]
    fn converts_mol_to_kg() {
        let kg = Molecule::No2.to_mass_rate(1000.0).unwrap();
        assert!((kg - 46.0).abs() < 1e-12);
        assert_eq!(Molecule::Other("SO2".into()).to_mass_rate(1.0), None);
    }

    #[test]
    fn single_molecule_setup_is_well_formed() {
        let logger = RecordingLogger::default();
        let setup = BasinSetup::new(
            "po",
            "TROPOMI",
            vec![Molecule::No2],
            vec!["ceds".to_string()],
            &logger,
        );
        assert!(setup.is_well_formed());
        assert_eq!(logger.count(Level::Error), 0);
        assert_eq!(setup.primary_molecule(), Some(&Molecule::No2));
        assert_eq!(setup.molecular_weights(), vec![Some(0.046)]);
    }

    #[test]
    fn malformed_setup_is_logged_not_raised() {
        let logger = RecordingLogger::default();
        let setup = BasinSetup::new(
            "jh",
            "OMI",
            vec![Molecule::No2, Molecule::Nh3],
            vec!["carb".to_string()],
            &logger,
        );
        assert!(!setup.is_well_formed());
        assert_eq!(logger.count(Level::Error), 2);
        assert!(logger.contains(Level::Error, "Only one molecule"));
        assert_eq!(setup.molecules.len(), 2);
    }
}
