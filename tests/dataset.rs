use posbias::batch::{collate, Layout};
use posbias::dataset::Indexing;
use posbias::predict::{Predictor, Scorer};
use posbias::store::{INDEX_FILE, RECORDS_FILE};
use posbias::{DatasetOptions, Error, PositionDataset, RankingSink, Store};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ITEMS: &str = "1:1 2:1\n3:1\n5:1 4:1\n22:1 10:1\n";

// 10 slots each, item ids < 4
const TRAIN: &str = "\
3:1,0,2:0,1,0:0,1:0,2:0,3:0,0:0,1:0 10:1 22:1
0:0,1:0,2:0,3:0,0:0,1:0,2:0,3:0,0:0,1 7:0.5 30:1 2:1
2,2,2,2,2,2,2,2,2,2:0 45:1
";

fn dataset_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("item.svm"), ITEMS).unwrap();
    fs::write(dir.path().join("tr.svm"), TRAIN).unwrap();
    dir
}

fn open(dir: &Path, opts: DatasetOptions) -> PositionDataset {
    PositionDataset::open(dir, &opts).unwrap()
}

#[test]
fn builds_store_on_first_open() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));

    assert!(dir.path().join("tr.store").join(INDEX_FILE).is_file());
    assert_eq!(ds.samples(), 3);
    assert_eq!(ds.item_num(), 4);
    assert_eq!(ds.max_dim(), 46);
    assert_eq!(ds.len(), 30);
    assert_eq!(ds.indexing(), Indexing::Train);
}

#[test]
fn first_slot_of_first_impression() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));

    let s = ds.get(0).unwrap();
    assert_eq!(s.item_id, 3);
    assert_eq!(s.label, Some(1));
    assert_eq!(s.context, vec![10, 22]);
    assert_eq!(s.item, vec![10, 22]);
    assert_eq!(s.position, 1);
}

#[test]
fn train_view_positions_and_determinism() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));

    for idx in 0..ds.len() {
        let a = ds.get(idx).unwrap();
        assert_eq!(a.position as u64, idx % 10 + 1);
        assert_eq!(a, ds.get(idx).unwrap());
    }
    let s = ds.get(19).unwrap();
    assert_eq!((s.item_id, s.label), (1, Some(1)));
    assert_eq!(s.context, vec![2, 7, 30]);
    assert_eq!(s.item, vec![3]);

    let s = ds.get(29).unwrap();
    assert_eq!((s.item_id, s.label), (2, Some(0)));
    assert_eq!(s.item, vec![4, 5]);
}

#[test]
fn eval_view_enumerates_every_item() {
    let dir = dataset_dir();
    let mut opts = DatasetOptions::new("tr");
    opts.eval = true;
    let ds = open(dir.path(), opts);

    assert_eq!(ds.indexing(), Indexing::Eval { item_num: 4 });
    assert_eq!(ds.len(), 12);
    for idx in 0..ds.len() {
        let s = ds.get(idx).unwrap();
        assert_eq!(s.item_id as u64, idx % 4);
        assert_eq!(s.position, 0);
        assert_eq!(s.label, None);
    }

    // everything after the first slot pair
    let s = ds.get(8 + 2).unwrap();
    assert_eq!(s.item, vec![4, 5]);
    assert_eq!(s.context.len(), 18 + 1);
    assert_eq!(s.context.last(), Some(&45));
}

#[test]
fn ceiling_hides_later_feature_ids() {
    let dir = dataset_dir();
    let train = open(dir.path(), DatasetOptions::new("tr"));

    let mut opts = DatasetOptions::new("tr");
    opts.max_context_dim = Some(20);
    let capped = open(dir.path(), opts);

    for idx in 0..capped.len() {
        let s = capped.get(idx).unwrap();
        assert!(s.context.iter().all(|&id| id <= 20), "{:?}", s.context);
        let mut full = train.get(idx).unwrap().context;
        full.retain(|&id| id <= 20);
        assert_eq!(s.context, full);
    }
    assert_eq!(capped.get(0).unwrap().context, vec![10]);
    assert_eq!(train.context_ceiling(), 45);
}

#[test]
fn out_of_range_index_is_an_error() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));
    assert!(matches!(
        ds.get(30),
        Err(Error::IndexOutOfRange { index: 30, len: 30 })
    ));
}

#[test]
fn missing_raw_log_fails_before_touching_store() {
    let dir = dataset_dir();
    let err = PositionDataset::open(dir.path(), &DatasetOptions::new("va")).err().unwrap();
    assert!(matches!(err, Error::MissingInput { .. }));
    assert!(!dir.path().join("va.store").exists());
}

#[test]
fn store_without_metadata_is_rebuilt() {
    let dir = dataset_dir();
    let store = dir.path().join("tr.store");
    fs::create_dir_all(&store).unwrap();
    fs::write(store.join(RECORDS_FILE), b"junk").unwrap();

    let ds = open(dir.path(), DatasetOptions::new("tr"));
    assert_eq!(ds.samples(), 3);
    assert_eq!(ds.get(0).unwrap().item_id, 3);
}

#[test]
fn store_with_empty_index_is_rebuilt() {
    let dir = dataset_dir();
    let store = dir.path().join("tr.store");
    fs::create_dir_all(&store).unwrap();
    fs::write(store.join(RECORDS_FILE), b"junk").unwrap();
    fs::write(store.join(INDEX_FILE), b"").unwrap();

    let ds = open(dir.path(), DatasetOptions::new("tr"));
    assert_eq!(ds.samples(), 3);
    assert_eq!(ds.item_num(), 4);
    assert_eq!(ds.get(0).unwrap().item_id, 3);
}

#[test]
fn rebuild_flag_picks_up_new_log() {
    let dir = dataset_dir();
    assert_eq!(open(dir.path(), DatasetOptions::new("tr")).samples(), 3);

    fs::write(
        dir.path().join("tr.svm"),
        "0,1,2,3,0,1,2,3,0,1 99:1\n",
    )
    .unwrap();
    assert_eq!(open(dir.path(), DatasetOptions::new("tr")).samples(), 3);

    let mut opts = DatasetOptions::new("tr");
    opts.rebuild = true;
    let ds = open(dir.path(), opts);
    assert_eq!(ds.samples(), 1);
    assert_eq!(ds.max_dim(), 100);
}

#[test]
fn failed_rebuild_leaves_no_store() {
    let dir = dataset_dir();
    open(dir.path(), DatasetOptions::new("tr"));

    fs::write(dir.path().join("tr.svm"), "0,1,2 5:1\n").unwrap();
    let mut opts = DatasetOptions::new("tr");
    opts.rebuild = true;
    let err = PositionDataset::open(dir.path(), &opts).err().unwrap();
    assert!(matches!(err, Error::MalformedLine { line: 1, .. }));
    assert!(matches!(
        Store::open(dir.path().join("tr.store")),
        Err(Error::NotBuilt { .. })
    ));
}

#[test]
fn concurrent_readers_agree() {
    let dir = dataset_dir();
    let expected: Vec<_> = {
        let ds = open(dir.path(), DatasetOptions::new("tr"));
        (0..ds.len()).map(|i| ds.get(i).unwrap()).collect()
    };

    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let expected = &expected;
            let path = dir.path();
            scope.spawn(move || {
                let ds = open(path, DatasetOptions::new("tr"));
                let mut rng = StdRng::seed_from_u64(t);
                for _ in 0..200 {
                    let idx = rng.gen_range(0..ds.len());
                    assert_eq!(ds.get(idx).unwrap(), expected[idx as usize]);
                }
            });
        }
    });
}

#[test]
fn collated_batch_feeds_model_interface() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));
    let samples: Vec<_> = (0..3).map(|i| ds.get(i).unwrap()).collect();
    let batch = collate(&samples, Layout::Split);
    assert_eq!(batch.positions, vec![1, 2, 3]);
    assert_eq!(batch.labels, vec![1.0, 1.0, 0.0]);
    assert_eq!(batch.item_row(1), &[1, 2]);
}

/// Prefers items with more features; ties resolve to the lower item id.
struct FeatureCount;

impl Scorer for FeatureCount {
    fn score(&mut self, batch: &posbias::batch::Batch) -> posbias::Result<Vec<f32>> {
        Ok((0..batch.rows)
            .map(|r| batch.item_row(r).iter().filter(|&&id| id != 0).count() as f32 / 10.0)
            .collect())
    }
}

#[test]
fn predictor_ranks_every_impression() {
    let dir = dataset_dir();
    let mut opts = DatasetOptions::new("tr");
    opts.eval = true;
    let ds = open(dir.path(), opts);

    let out = dir.path().join("preds");
    let bids = vec![vec![1.0; 4], vec![1.0, 1.0, 1.0, 5.0]];
    let mut sink = RankingSink::open(&out, bids.len()).unwrap();
    let predictor = Predictor {
        batch_size: 5,
        layout: Layout::Split,
        k: 2,
    };
    let summary = predictor.run(&ds, &mut FeatureCount, &bids, &mut sink).unwrap();
    assert_eq!(summary.users, 3);
    assert_eq!(summary.batches, 3);

    let flat = fs::read_to_string(out.join("pred.0")).unwrap();
    assert_eq!(flat.lines().collect::<Vec<_>>(), vec!["0:1.0000 2:1.0000"; 3]);
    let boosted = fs::read_to_string(out.join("pred.1")).unwrap();
    assert_eq!(boosted.lines().next(), Some("3:5.0000 0:1.0000"));
}

#[test]
fn predictor_needs_eval_view() {
    let dir = dataset_dir();
    let ds = open(dir.path(), DatasetOptions::new("tr"));
    let mut sink = RankingSink::open(dir.path().join("preds"), 1).unwrap();
    let err = Predictor::default()
        .run(&ds, &mut FeatureCount, &[vec![1.0; 4]], &mut sink)
        .unwrap_err();
    assert!(matches!(err, Error::NotEvalView));
}
