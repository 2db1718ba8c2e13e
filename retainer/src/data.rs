use ndarray::{Array1, Array2, Axis};
use ndarray_rand::{
    rand_distr::{Normal, Uniform},
    RandomExt,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{
    config::Config,
    error::{Error, Result},
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f64>,
    /// Multi-hot over every class of the experiment.
    pub targets: Array2<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

/// A restartable sequence of batches: every call to `batches` starts over.
pub trait BatchSource {
    fn batches(&self) -> Box<dyn Iterator<Item = &Batch> + '_>;

    fn input_width(&self) -> usize;

    fn num_samples(&self) -> usize {
        self.batches().map(|b| b.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct InMemorySource {
    batches: Vec<Batch>,
    input_width: usize,
}

impl InMemorySource {
    pub fn from_samples(
        inputs: Array2<f64>,
        labels: &[usize],
        num_classes: usize,
        batch_size: usize,
    ) -> Result<InMemorySource> {
        if inputs.nrows() != labels.len() {
            return Err(Error::Dataset(format!(
                "{} inputs but {} labels",
                inputs.nrows(),
                labels.len()
            )));
        }
        if inputs.nrows() == 0 {
            return Err(Error::Dataset("split has no samples".into()));
        }
        if batch_size == 0 {
            return Err(Error::Dataset("batch size must be non-zero".into()));
        }
        if let Some(label) = labels.iter().find(|l| **l >= num_classes) {
            return Err(Error::Dataset(format!(
                "label {} outside {} classes",
                label, num_classes
            )));
        }

        let input_width = inputs.ncols();
        let mut targets = Array2::zeros((labels.len(), num_classes));
        for (row, label) in labels.iter().enumerate() {
            targets[[row, *label]] = 1.;
        }

        let batches = inputs
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(targets.axis_chunks_iter(Axis(0), batch_size))
            .map(|(x, t)| Batch {
                inputs: x.to_owned(),
                targets: t.to_owned(),
            })
            .collect::<Vec<Batch>>();

        Ok(InMemorySource {
            batches,
            input_width,
        })
    }
}

impl BatchSource for InMemorySource {
    fn batches(&self) -> Box<dyn Iterator<Item = &Batch> + '_> {
        Box::new(self.batches.iter())
    }

    fn input_width(&self) -> usize {
        self.input_width
    }
}

#[derive(Debug, Clone)]
pub struct Splits {
    pub train: InMemorySource,
    pub valid: InMemorySource,
    pub test: InMemorySource,
}

#[derive(Serialize, Deserialize, Debug)]
struct SplitFile {
    inputs: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DatasetFile {
    train: SplitFile,
    valid: SplitFile,
    test: SplitFile,
}

impl Splits {
    /// Gaussian blobs, one per class, around centres drawn from the seed.
    pub fn synthetic(config: &Config) -> Result<Splits> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let width = config.input_width();
        let n_classes = config.num_classes();
        let sizes = &config.synthetic;

        let noise = Normal::new(0., sizes.spread)
            .map_err(|e| Error::Dataset(format!("bad spread {}: {}", sizes.spread, e)))?;
        let centres = Array2::random_using((n_classes, width), Uniform::new(-1., 1.), &mut rng);

        let mut split = |per_class: usize| -> Result<InMemorySource> {
            let mut order = (0..n_classes * per_class).collect::<Vec<usize>>();
            order.shuffle(&mut rng);

            let mut inputs = Array2::zeros((order.len(), width));
            let mut labels = vec![0; order.len()];
            for (row, sample) in order.into_iter().enumerate() {
                let cls = sample / per_class;
                let point: Array1<f64> =
                    &centres.row(cls) + &Array1::random_using(width, noise, &mut rng);
                inputs.row_mut(row).assign(&point);
                labels[row] = cls;
            }

            InMemorySource::from_samples(inputs, &labels, n_classes, config.batch_size)
        };

        Ok(Splits {
            train: split(sizes.train_per_class)?,
            valid: split(sizes.valid_per_class)?,
            test: split(sizes.test_per_class)?,
        })
    }

    /// Reads `{"train": {"inputs": [[..]], "labels": [..]}, "valid": .., "test": ..}`.
    pub fn load_json(path: impl AsRef<Path>, num_classes: usize, batch_size: usize) -> Result<Splits> {
        let bytes = fs::read(path)?;
        let file: DatasetFile = serde_json::from_slice(&bytes)?;

        let to_source = |name: &str, split: SplitFile| -> Result<InMemorySource> {
            let width = split.inputs.first().map(|row| row.len()).unwrap_or(0);
            if split.inputs.iter().any(|row| row.len() != width) {
                return Err(Error::Dataset(format!("{} split has ragged rows", name)));
            }

            let n = split.inputs.len();
            let flat = split.inputs.into_iter().flatten().collect::<Vec<f64>>();
            let inputs = Array2::from_shape_vec((n, width), flat)
                .map_err(|e| Error::Dataset(format!("{} split: {}", name, e)))?;

            InMemorySource::from_samples(inputs, &split.labels, num_classes, batch_size)
        };

        let splits = Splits {
            train: to_source("train", file.train)?,
            valid: to_source("valid", file.valid)?,
            test: to_source("test", file.test)?,
        };
        splits.check_widths()?;

        Ok(splits)
    }

    /// Validation and test inputs must be as wide as the training inputs.
    pub fn check_widths(&self) -> Result<()> {
        let width = self.train.input_width();
        for (name, source) in [("valid", &self.valid), ("test", &self.test)] {
            if source.input_width() != width {
                return Err(Error::Dataset(format!(
                    "{} split is {} wide, train split is {}",
                    name,
                    source.input_width(),
                    width
                )));
            }
        }
        Ok(())
    }

    pub fn input_width(&self) -> usize {
        self.train.input_width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn batches_cover_every_sample() {
        let inputs = Array2::from_shape_fn((5, 2), |(r, c)| (r * 2 + c) as f64);
        let source = InMemorySource::from_samples(inputs, &[0, 1, 2, 1, 0], 3, 2).unwrap();

        let sizes = source.batches().map(|b| b.len()).collect::<Vec<usize>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(source.num_samples(), 5);

        let last = source.batches().last().unwrap();
        assert_eq!(last.targets, array![[1.0, 0.0, 0.0]]);
    }

    #[test]
    fn source_restarts() {
        let source =
            InMemorySource::from_samples(Array2::zeros((3, 1)), &[0, 0, 1], 2, 2).unwrap();
        assert_eq!(source.batches().count(), 2);
        assert_eq!(source.batches().count(), 2);
    }

    #[test]
    fn rejects_unknown_labels() {
        let res = InMemorySource::from_samples(Array2::zeros((2, 1)), &[0, 3], 2, 1);
        assert!(matches!(res, Err(Error::Dataset(_))));
    }

    #[test]
    fn synthetic_is_seeded() {
        let mut config = Config::new();
        config.layers = vec![6, 4, 3];
        config.classes = vec![0, 1, 2];
        config.batch_size = 16;
        config.synthetic.train_per_class = 10;
        config.synthetic.valid_per_class = 4;
        config.synthetic.test_per_class = 4;

        let a = Splits::synthetic(&config).unwrap();
        let b = Splits::synthetic(&config).unwrap();
        assert_eq!(a.train.num_samples(), 30);
        assert_eq!(a.test.num_samples(), 12);
        assert_eq!(a.input_width(), 6);

        let xa = a.train.batches().next().unwrap();
        let xb = b.train.batches().next().unwrap();
        assert_eq!(xa.inputs, xb.inputs);
    }

    #[test]
    fn json_dataset_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let split = r#"{"inputs": [[0.0, 1.0], [1.0, 0.0]], "labels": [0, 1]}"#;
        let body = format!(r#"{{"train": {s}, "valid": {s}, "test": {s}}}"#, s = split);
        fs::write(&path, body).unwrap();

        let splits = Splits::load_json(&path, 2, 8).unwrap();
        assert_eq!(splits.valid.num_samples(), 2);
        assert_eq!(splits.input_width(), 2);
    }

    #[test]
    fn json_dataset_rejects_splits_of_different_widths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let train = r#"{"inputs": [[0.0, 1.0], [1.0, 0.0]], "labels": [0, 1]}"#;
        let wide = r#"{"inputs": [[0.0, 1.0, 2.0], [1.0, 0.0, 2.0]], "labels": [0, 1]}"#;
        let body = format!(r#"{{"train": {t}, "valid": {w}, "test": {t}}}"#, t = train, w = wide);
        fs::write(&path, body).unwrap();

        match Splits::load_json(&path, 2, 8) {
            Err(Error::Dataset(msg)) => assert!(msg.contains("valid")),
            other => panic!("expected a dataset error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn json_dataset_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let bad = r#"{"inputs": [[0.0, 1.0], [1.0]], "labels": [0, 1]}"#;
        let good = r#"{"inputs": [[0.0]], "labels": [0]}"#;
        let body = format!(r#"{{"train": {}, "valid": {g}, "test": {g}}}"#, bad, g = good);
        fs::write(&path, body).unwrap();

        assert!(matches!(
            Splits::load_json(&path, 2, 8),
            Err(Error::Dataset(_))
        ));
    }
}
