//! Reference analysis and a small hand-checked event batch.

use serde_json::json;

use crate::config::{AnalysisConfig, ComponentRegistry, Configurator};
use crate::core::{ChunkSpec, ColumnData, EventBatch, ObjectCollection};
use crate::errors::{DataError, EventflowError};
use crate::pipeline::Analysis;

/// Sample name used by the MC fixtures.
pub const SCENARIO_SAMPLE: &str = "TTTo2L2Nu";

/// Sample name used by the data fixtures.
pub const SCENARIO_DATA_SAMPLE: &str = "DATA_SingleMuon";

/// Number of events in [`scenario_batch`].
pub const SCENARIO_EVENTS: usize = 10;

const FLAGS: [&str; 6] = crate::config::EVENT_FLAGS;

const SCALE_FACTORS: [(&str, f64); 7] = [
    ("pileup", 0.95),
    ("sf_ele_id", 0.98),
    ("sf_ele_reco", 0.99),
    ("sf_mu_id", 0.97),
    ("sf_mu_iso", 0.99),
    ("sf_btag", 0.9),
    ("sf_mu_trigger", 0.96),
];

/// Per-event jets as `(pt, eta, phi, btag)`.
///
/// With the tutorial workflow (`pt >= 30`, `|eta| < 2.4`, `btag >= 0.5`)
/// the six events passing the skim (0, 2, 3, 5, 6, 9) have `[2, 1, 2, 2, 0, 2]`
/// good jets and `[1, 1, 0, 2, 0, 1]` b-tagged jets.
const JETS: [&[(f64, f64, f64, f64)]; SCENARIO_EVENTS] = [
    &[(50.0, 0.5, 0.1, 0.9), (35.0, 1.0, 1.2, 0.1)],
    &[(60.0, 0.2, -0.5, 0.8)],
    &[(45.0, -1.2, 2.0, 0.7)],
    &[(40.0, 0.3, -1.0, 0.2), (32.0, 2.0, 0.4, 0.1)],
    &[],
    &[(80.0, 0.1, 0.3, 0.95), (70.0, -0.4, -2.5, 0.85), (25.0, 0.0, 1.5, 0.9)],
    &[(55.0, 3.0, 0.0, 0.9)],
    &[(30.0, 0.0, -0.3, 0.6)],
    &[(33.0, 1.5, 2.8, 0.3)],
    &[(90.0, 0.7, -1.8, 0.99), (31.0, -2.2, 0.9, 0.05)],
];

/// Per-event electrons as `(pt, eta, phi)`.
const ELECTRONS: [&[(f64, f64, f64)]; SCENARIO_EVENTS] = [
    &[(25.0, 0.4, 1.0)],
    &[],
    &[(18.0, -0.8, -2.0)],
    &[],
    &[],
    &[(40.0, 1.1, 0.2), (12.0, 0.3, 2.9)],
    &[],
    &[],
    &[(30.0, -1.5, -0.7)],
    &[],
];

const MET_PT: [f64; SCENARIO_EVENTS] = [40.0, 20.0, 55.0, 35.0, 10.0, 80.0, 25.0, 15.0, 30.0, 60.0];
const MET_PHI: [f64; SCENARIO_EVENTS] = [0.5, -1.0, 2.2, -0.3, 1.4, -2.8, 0.9, 0.0, -1.6, 3.0];

/// Good primary vertices; six events have at least one.
const NPV_GOOD: [i64; SCENARIO_EVENTS] = [1, 0, 2, 1, 0, 3, 1, 0, 0, 2];

const GEN_WEIGHT: [f64; SCENARIO_EVENTS] = [1.0, 0.5, 1.0, 2.0, 1.0, 1.0, 1.5, 1.0, 1.0, 0.5];

fn collection<const N: usize>(
    events: &[&[[f64; N]]],
    fields: [&str; N],
) -> Result<ObjectCollection, DataError> {
    let counts: Vec<usize> = events.iter().map(|objects| objects.len()).collect();
    let mut coll = ObjectCollection::from_counts(&counts);
    for (i, field) in fields.iter().enumerate() {
        let values = events.iter().flat_map(|objects| objects.iter().map(|o| o[i])).collect();
        coll = coll.with_field(*field, values)?;
    }
    Ok(coll)
}

fn jets() -> Result<ObjectCollection, DataError> {
    let rows: Vec<Vec<[f64; 7]>> = JETS
        .iter()
        .map(|event| {
            event
                .iter()
                .map(|&(pt, eta, phi, btag)| [pt, eta, phi, 10.0, btag, 0.05, 0.02])
                .collect()
        })
        .collect();
    let events: Vec<&[[f64; 7]]> = rows.iter().map(Vec::as_slice).collect();
    collection(&events, ["pt", "eta", "phi", "mass", "btag", "jes_unc", "jer_unc"])
}

fn electrons() -> Result<ObjectCollection, DataError> {
    let rows: Vec<Vec<[f64; 5]>> = ELECTRONS
        .iter()
        .map(|event| {
            event
                .iter()
                .map(|&(pt, eta, phi)| [pt, eta, phi, 0.01, 0.02])
                .collect()
        })
        .collect();
    let events: Vec<&[[f64; 5]]> = rows.iter().map(Vec::as_slice).collect();
    collection(&events, ["pt", "eta", "phi", "scale_unc", "smear_unc"])
}

fn met() -> Result<ObjectCollection, DataError> {
    ObjectCollection::from_counts(&[1; SCENARIO_EVENTS])
        .with_field("pt", MET_PT.to_vec())?
        .with_field("phi", MET_PHI.to_vec())
}

/// Ten events carrying every input the tutorial analysis reads.
///
/// Six events pass the skim, all six enter `baseline` and four of them have
/// at least one b-tagged jet.
///
/// # Errors
///
/// Returns an error only if the fixture tables are inconsistent.
pub fn scenario_batch() -> Result<EventBatch, DataError> {
    let mut batch = EventBatch::new(SCENARIO_EVENTS)
        .with_column("PV_npvsGood", ColumnData::Int(NPV_GOOD.to_vec()))?
        .with_column("goldenJson", ColumnData::Bool(vec![true; SCENARIO_EVENTS]))?
        .with_column("genWeight", ColumnData::Float(GEN_WEIGHT.to_vec()))?
        .with_collection("Jet", jets()?)?
        .with_collection("Electron", electrons()?)?
        .with_collection("MET", met()?)?;

    for flag in FLAGS {
        batch = batch.with_column(flag, ColumnData::Bool(vec![true; SCENARIO_EVENTS]))?;
    }
    for (name, nominal) in SCALE_FACTORS {
        batch = batch
            .with_column(name, ColumnData::Float(vec![nominal; SCENARIO_EVENTS]))?
            .with_column(format!("{name}Up"), ColumnData::Float(vec![nominal + 0.05; SCENARIO_EVENTS]))?
            .with_column(format!("{name}Down"), ColumnData::Float(vec![nominal - 0.05; SCENARIO_EVENTS]))?;
    }
    Ok(batch)
}

/// Sum of the generator weights in [`scenario_batch`].
#[must_use]
pub fn scenario_sum_genweights() -> f64 {
    GEN_WEIGHT.iter().sum()
}

/// An MC chunk covering `start..stop` of `file`, with the sample metadata
/// the tutorial weights read.
#[must_use]
pub fn scenario_chunk(file: &str, start: u64, stop: u64) -> ChunkSpec {
    ChunkSpec::new(SCENARIO_SAMPLE, file, start, stop)
        .with_year("2018")
        .with_metadata("luminosity", 59.74)
        .with_metadata("xsec", 88.29)
        .with_metadata("sum_genweights", scenario_sum_genweights())
}

/// A data chunk covering `start..stop` of `file`.
#[must_use]
pub fn data_chunk(file: &str, start: u64, stop: u64) -> ChunkSpec {
    ChunkSpec::new(SCENARIO_DATA_SAMPLE, file, start, stop)
        .with_year("2018")
        .as_data()
}

/// The shape-variations tutorial analysis as JSON.
#[must_use]
pub fn tutorial_config_json() -> String {
    let common_weights = json!([
        "genWeight", "lumi", "XS", "pileup",
        "sf_ele_id", "sf_ele_reco", "sf_mu_id", "sf_mu_iso"
    ]);
    let common_variations = json!([
        "pileup", "sf_ele_id", "sf_ele_reco", "sf_mu_id", "sf_mu_iso"
    ]);
    let btag_layers = json!({
        "1btag": ["sf_btag"],
        "2btag": ["sf_btag"]
    });
    let trigger_layers = json!({
        "TTTo2L2Nu": {
            "bycategory": {
                "1btag": ["sf_mu_trigger"],
                "2btag": ["sf_mu_trigger"]
            }
        }
    });

    json!({
        "datasets": {
            "jsons": ["datasets/backgrounds_MC_ttbar.json", "datasets/DATA_SingleMuon.json"],
            "filter": {
                "samples": [SCENARIO_SAMPLE, SCENARIO_DATA_SAMPLE],
                "year": ["2018"]
            }
        },
        "workflow": {
            "name": "ttbar_base",
            "objects": {
                "JetGood": {
                    "source": "Jet",
                    "cuts": [
                        {"field": "pt", "min": 30.0},
                        {"field": "eta", "max": 2.4, "abs": true}
                    ]
                },
                "BJetGood": {
                    "source": "JetGood",
                    "cuts": [{"field": "btag", "min": 0.5}]
                },
                "ElectronGood": {
                    "source": "Electron",
                    "cuts": [
                        {"field": "pt", "min": 15.0},
                        {"field": "eta", "max": 2.5, "abs": true}
                    ]
                }
            }
        },
        "calibrators": ["jet_calibration", "met_calibration", "electron_scale_and_smearing"],
        "skim": [
            {"type": "min_column", "name": "nPVgood_1", "column": "PV_npvsGood", "min": 1.0},
            "eventFlags",
            "goldenJson"
        ],
        "preselections": ["passthrough"],
        "categories": {
            "baseline": ["passthrough"],
            "1btag": [{"type": "min_objects", "coll": "BJetGood", "n": 1}],
            "2btag": [{"type": "min_objects", "coll": "BJetGood", "n": 2}],
            "2jets": [{"type": "min_objects", "coll": "JetGood", "n": 2}]
        },
        "weights": {
            "common": {
                "inclusive": common_weights,
                "bycategory": btag_layers.clone()
            },
            "bysample": trigger_layers.clone()
        },
        "variations": {
            "weights": {
                "common": {
                    "inclusive": common_variations,
                    "bycategory": btag_layers
                },
                "bysample": trigger_layers
            },
            "shape": {
                "common": {
                    "inclusive": ["jet_calibration", "electron_scale_and_smearing"]
                }
            }
        },
        "variables": {
            "ElectronGood_pt": {
                "axes": [{"coll": "ElectronGood", "field": "pt", "label": "Electron $p_T$ [GeV]",
                          "bins": 20, "start": 0.0, "stop": 200.0}]
            },
            "JetGood_pt": {
                "axes": [{"coll": "JetGood", "field": "pt", "label": "Jet $p_T$ [GeV]",
                          "bins": 20, "start": 0.0, "stop": 200.0}]
            },
            "JetGood_eta": {
                "axes": [{"coll": "JetGood", "field": "eta", "label": "Jet $\\eta$",
                          "bins": 24, "start": -2.4, "stop": 2.4}]
            },
            "nJetGood": {
                "axes": [{"field": "nJetGood", "label": "$N_{JetGood}$",
                          "bins": 10, "start": 0.0, "stop": 10.0}]
            },
            "nBJetGood": {
                "axes": [{"field": "nBJetGood", "label": "$N_{BJetGood}$",
                          "bins": 10, "start": 0.0, "stop": 10.0}]
            },
            "MET_pt": {
                "axes": [{"coll": "MET", "field": "pt", "label": "MET $p_T$ [GeV]",
                          "bins": 50, "start": 0.0, "stop": 200.0}]
            }
        }
    })
    .to_string()
}

/// The tutorial analysis declaration.
///
/// # Errors
///
/// Returns a serialization error if the JSON no longer matches the config types.
pub fn tutorial_config() -> Result<AnalysisConfig, EventflowError> {
    AnalysisConfig::from_json_str(&tutorial_config_json())
}

/// The tutorial analysis built against the default registry.
///
/// # Errors
///
/// Returns an error if the declaration does not parse or validate.
pub fn tutorial_analysis() -> Result<Analysis, EventflowError> {
    let config = tutorial_config()?;
    Ok(Configurator::build(&config, &ComponentRegistry::with_defaults())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_batch_shape() {
        let batch = scenario_batch().unwrap();
        assert_eq!(batch.n_events(), SCENARIO_EVENTS);
        assert_eq!(batch.collection("Jet").unwrap().n_objects(), 14);
        assert_eq!(batch.collection("Electron").unwrap().n_objects(), 5);
        assert!(batch.column("sf_btagUp").is_some());
        assert!((scenario_sum_genweights() - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_chunk_helpers() {
        let chunk = scenario_chunk("a.root", 0, 10);
        assert!(!chunk.is_data);
        assert_eq!(chunk.metadata.get("luminosity"), Some(&59.74));
        assert!(data_chunk("b.root", 0, 10).is_data);
    }
}
