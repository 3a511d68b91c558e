use crate::Error;
use serde::{Deserialize, Serialize};

/// Provenance of a query spectrum that was selected through a precursor feature
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub feature_idx: usize,
    pub raw_idx: usize,
}

/// A precursor feature detected upstream, pointing at one raw spectrum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecursorFeature {
    pub query_idx: usize,
    pub feature_idx: usize,
    #[serde(default)]
    pub corrected_mass: Option<f32>,
    pub mass_matched: f32,
    pub mz_matched: f32,
    pub rt_matched: f32,
}

/// Observed spectra of one experiment. Fragments are stored as concatenated
/// ragged arrays: spectrum `i` owns `offset_index[i]..offset_index[i + 1]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuerySpectra {
    pub precursor_masses: Vec<f32>,
    pub mz: Vec<f32>,
    pub retention_time: Vec<f32>,
    pub charges: Vec<u8>,
    pub fragment_masses: Vec<f32>,
    pub fragment_intensities: Vec<f32>,
    pub offset_index: Vec<usize>,
    #[serde(default)]
    pub origin: Option<Vec<Origin>>,
}

impl QuerySpectra {
    pub fn len(&self) -> usize {
        self.precursor_masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precursor_masses.is_empty()
    }

    /// Fragment masses and intensities of spectrum `idx`
    pub fn fragments(&self, idx: usize) -> (&[f32], &[f32]) {
        let range = self.offset_index[idx]..self.offset_index[idx + 1];
        (
            &self.fragment_masses[range.clone()],
            &self.fragment_intensities[range],
        )
    }

    pub fn origin(&self, idx: usize) -> Option<Origin> {
        self.origin.as_ref().map(|origin| origin[idx])
    }

    /// Check that all per-spectrum columns are aligned, that `offset_index`
    /// is monotonic and spans the fragment arrays, and that each spectrum's
    /// fragments are mass-ascending
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.len();
        if self.mz.len() != n || self.retention_time.len() != n || self.charges.len() != n {
            return Err(Error::Shape(format!(
                "query columns are not aligned: {} precursors, {} m/z, {} retention times, {} charges",
                n,
                self.mz.len(),
                self.retention_time.len(),
                self.charges.len()
            )));
        }
        if self.fragment_masses.len() != self.fragment_intensities.len() {
            return Err(Error::Shape(format!(
                "{} fragment masses but {} fragment intensities",
                self.fragment_masses.len(),
                self.fragment_intensities.len()
            )));
        }
        if self.offset_index.len() != n + 1 {
            return Err(Error::Shape(format!(
                "offset index has length {}, expected {}",
                self.offset_index.len(),
                n + 1
            )));
        }
        if self.offset_index[0] != 0 || self.offset_index[n] != self.fragment_masses.len() {
            return Err(Error::Shape(
                "offset index does not span the fragment arrays".into(),
            ));
        }
        if let Some(window) = self.offset_index.windows(2).position(|w| w[0] > w[1]) {
            return Err(Error::Shape(format!(
                "offset index decreases at position {}",
                window + 1
            )));
        }
        if let Some(origin) = &self.origin {
            if origin.len() != n {
                return Err(Error::Shape(format!(
                    "{} provenance rows for {} spectra",
                    origin.len(),
                    n
                )));
            }
        }
        for idx in 0..n {
            let (masses, _) = self.fragments(idx);
            if masses.windows(2).any(|w| w[0] > w[1]) {
                return Err(Error::Shape(format!(
                    "fragments of spectrum {} are not sorted by mass",
                    idx
                )));
            }
        }
        Ok(())
    }

    /// Restrict and relabel spectra through a feature table: one output
    /// spectrum per feature, in feature order
    pub fn select(&self, features: &[PrecursorFeature], calibrated: bool) -> Result<Self, Error> {
        let mut selected = QuerySpectra {
            offset_index: vec![0],
            origin: Some(Vec::with_capacity(features.len())),
            ..Default::default()
        };

        for feature in features {
            if feature.query_idx >= self.len() {
                return Err(Error::Config(format!(
                    "feature {} references spectrum {}, but only {} spectra exist",
                    feature.feature_idx,
                    feature.query_idx,
                    self.len()
                )));
            }
            let mass = match (calibrated, feature.corrected_mass) {
                (true, Some(corrected)) => corrected,
                _ => feature.mass_matched,
            };
            let (masses, intensities) = self.fragments(feature.query_idx);

            selected.precursor_masses.push(mass);
            selected.mz.push(feature.mz_matched);
            selected.retention_time.push(feature.rt_matched);
            selected.charges.push(self.charges[feature.query_idx]);
            selected.fragment_masses.extend_from_slice(masses);
            selected.fragment_intensities.extend_from_slice(intensities);
            selected.offset_index.push(selected.fragment_masses.len());
            if let Some(origin) = selected.origin.as_mut() {
                origin.push(Origin {
                    feature_idx: feature.feature_idx,
                    raw_idx: feature.query_idx,
                });
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spectra() -> QuerySpectra {
        QuerySpectra {
            precursor_masses: vec![500.0, 600.0],
            mz: vec![251.0, 301.0],
            retention_time: vec![10.0, 12.5],
            charges: vec![2, 2],
            fragment_masses: vec![100.0, 200.0, 150.0],
            fragment_intensities: vec![1.0, 2.0, 3.0],
            offset_index: vec![0, 2, 3],
            origin: None,
        }
    }

    #[test]
    fn fragments_follow_offsets() {
        let s = spectra();
        assert!(s.validate().is_ok());
        assert_eq!(s.fragments(0), (&[100.0, 200.0][..], &[1.0, 2.0][..]));
        assert_eq!(s.fragments(1), (&[150.0][..], &[3.0][..]));
    }

    #[test]
    fn validation_failures() {
        let mut s = spectra();
        s.offset_index = vec![0, 3, 2];
        assert!(matches!(s.validate(), Err(Error::Shape(_))));

        let mut s = spectra();
        s.charges.pop();
        assert!(s.validate().is_err());

        let mut s = spectra();
        s.fragment_masses.swap(0, 1);
        assert!(s.validate().is_err());

        let mut s = spectra();
        s.offset_index.pop();
        assert!(s.validate().is_err());
    }

    #[test]
    fn select_relabels_features() -> Result<(), Error> {
        let features = vec![
            PrecursorFeature {
                query_idx: 1,
                feature_idx: 7,
                corrected_mass: Some(600.01),
                mass_matched: 600.02,
                mz_matched: 301.5,
                rt_matched: 12.0,
            },
            PrecursorFeature {
                query_idx: 1,
                feature_idx: 8,
                corrected_mass: None,
                mass_matched: 599.0,
                mz_matched: 300.5,
                rt_matched: 12.1,
            },
        ];
        let s = spectra().select(&features, true)?;
        assert!(s.validate().is_ok());
        assert_eq!(s.len(), 2);
        assert_eq!(s.precursor_masses, vec![600.01, 599.0]);
        assert_eq!(s.mz, vec![301.5, 300.5]);
        assert_eq!(s.fragments(1), (&[150.0][..], &[3.0][..]));
        assert_eq!(
            s.origin(1),
            Some(Origin {
                feature_idx: 8,
                raw_idx: 1
            })
        );

        let uncalibrated = spectra().select(&features, false)?;
        assert_eq!(uncalibrated.precursor_masses, vec![600.02, 599.0]);
        Ok(())
    }

    #[test]
    fn select_rejects_dangling_feature() {
        let features = vec![PrecursorFeature {
            query_idx: 5,
            feature_idx: 0,
            corrected_mass: None,
            mass_matched: 1.0,
            mz_matched: 1.0,
            rt_matched: 1.0,
        }];
        assert!(matches!(
            spectra().select(&features, false),
            Err(Error::Config(_))
        ));
    }
}
