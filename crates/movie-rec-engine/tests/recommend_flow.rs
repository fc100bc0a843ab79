//! End-to-end flow: build a corpus, train a tiny model, load the
//! checkpoint and serve recommendations from it.

use std::collections::{BTreeMap, HashMap};

use candle_core::Device;
use movie_rec_engine::corpus::{self, InteractionEvent, SequenceSampleBuilder};
use movie_rec_engine::{
    InMemoryEmbeddingCache, InferenceEngine, ModelConfig, RecError, SamplerConfig, Trainer,
    TrainingConfig,
};

fn events(ids: &[i64]) -> Vec<InteractionEvent> {
    ids.iter()
        .enumerate()
        .map(|(i, &movie_id)| InteractionEvent {
            movie_id,
            rating: 5.0,
            timestamp: i as i64,
        })
        .collect()
}

/// Train on a small synthetic catalog and return a serving engine.
fn trained_engine() -> InferenceEngine {
    let dir = tempfile::tempdir().unwrap();

    let sampler = SequenceSampleBuilder::new(SamplerConfig {
        rating_threshold: 3.5,
        max_seq_len: 4,
        min_history_len: 3,
    });
    let mut by_user = BTreeMap::new();
    by_user.insert(1, events(&[10, 20, 30, 40]));
    by_user.insert(2, events(&[20, 30, 40, 50, 10]));
    by_user.insert(3, events(&[50, 40, 30, 20, 10, 60]));
    let records = sampler.build_corpus(&by_user);
    let vocab = corpus::build_vocabulary(&records);
    let samples = corpus::index_corpus(&records, &vocab).unwrap();

    let model_config = ModelConfig {
        num_items: vocab.num_items(),
        d_model: 8,
        n_heads: 2,
        n_layers: 1,
        max_seq_len: 4,
        pad_index: 0,
    };
    let training = TrainingConfig {
        batch_size: 4,
        num_epochs: 1,
        num_negatives: 2,
        learning_rate: 1e-2,
        log_every: 1000,
        seed: 5,
    };
    let mut trainer = Trainer::new(vocab, model_config, training, Device::Cpu).unwrap();
    let summary = trainer.train(&samples, dir.path()).unwrap();
    assert_eq!(summary.checkpoints.len(), 1);

    InferenceEngine::load(&summary.checkpoints[0]).unwrap()
}

#[test]
fn recommend_returns_at_most_k_with_non_increasing_scores() {
    let engine = trained_engine();
    let recs = engine.recommend(&[10, 20, 30], 3).unwrap();
    assert!(recs.len() <= 3);
    assert!(!recs.is_empty());
    for pair in recs.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for rec in &recs {
        assert!(engine.vocab().index_of(rec.movie_id).is_some());
    }
}

#[test]
fn recommend_drops_unknown_ids_silently() {
    let engine = trained_engine();
    let with_unknown = engine.recommend(&[10, 99999, 20], 5).unwrap();
    let without = engine.recommend(&[10, 20], 5).unwrap();
    assert_eq!(with_unknown.len(), without.len());
    for (a, b) in with_unknown.iter().zip(&without) {
        assert_eq!(a.movie_id, b.movie_id);
    }
}

#[test]
fn recommend_rejects_fully_unknown_history() {
    let engine = trained_engine();
    assert!(matches!(
        engine.recommend(&[99999], 5),
        Err(RecError::EmptyHistory)
    ));
    assert!(matches!(
        engine.recommend(&[], 5),
        Err(RecError::EmptyHistory)
    ));
}

#[test]
fn single_known_item_history_is_still_servable() {
    let engine = trained_engine();
    let recs = engine.recommend(&[10], 2).unwrap();
    assert!(!recs.is_empty());
}

#[test]
fn top_one_on_small_catalog_returns_exactly_one_known_id() {
    let engine = trained_engine();
    let recs = engine.recommend(&[10, 20], 1).unwrap();
    assert_eq!(recs.len(), 1);
    assert!(engine.vocab().index_of(recs[0].movie_id).is_some());
}

#[test]
fn similar_never_returns_the_seed() {
    let engine = trained_engine();
    let similar = engine.similar(30, 10).unwrap();
    assert!(!similar.is_empty());
    assert!(similar.iter().all(|s| s.movie_id != 30));
    for pair in similar.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn similar_fails_for_unknown_seed() {
    let engine = trained_engine();
    assert!(matches!(
        engine.similar(424242, 5),
        Err(RecError::SeedNotFound { movie_id: 424242 })
    ));
}

#[test]
fn batch_recommend_isolates_per_user_failures() {
    let engine = trained_engine();
    let mut histories = HashMap::new();
    histories.insert("u1".to_string(), vec![]);
    histories.insert("u2".to_string(), vec![10, 20]);
    let batch = engine.batch_recommend(&histories, 5);

    assert_eq!(batch.total_users, 2);
    assert_eq!(batch.success_count, 1);
    assert!(batch.failed_users.contains(&"u1".to_string()));
    assert!(!batch.failed_users.contains(&"u2".to_string()));
    assert!(batch.results.contains_key("u2"));
    assert!(!batch.results.contains_key("u1"));
}

#[test]
fn user_embedding_is_deterministic_across_calls() {
    let engine = trained_engine();
    let a = engine.user_embedding(&[10, 20, 30]).unwrap();
    let b = engine.user_embedding(&[10, 20, 30]).unwrap();
    assert_eq!(a, b);
}

#[test]
fn cached_embedding_round_trips_through_the_cache() {
    let engine = trained_engine();
    let cache = InMemoryEmbeddingCache::new();
    let history = vec![10, 20, 30];

    let first = engine
        .cached_user_embedding(&cache, "7", &history)
        .unwrap();
    let second = engine
        .cached_user_embedding(&cache, "7", &history)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.metrics().hits(), 1);
    assert_eq!(cache.metrics().misses(), 1);
}

#[test]
fn refresh_overwrites_the_cache_entry() {
    let engine = trained_engine();
    let cache = InMemoryEmbeddingCache::new();

    engine.refresh_user_embedding(&cache, "9", &[10, 20]).unwrap();
    let stored = cache.get_raw("user_emb:9");
    assert!(stored.is_some());

    engine
        .refresh_user_embedding(&cache, "9", &[10, 20, 30])
        .unwrap();
    let updated = cache.get_raw("user_emb:9");
    assert_ne!(stored, updated);
}

/// Test-only raw access.
trait RawGet {
    fn get_raw(&self, key: &str) -> Option<String>;
}

impl RawGet for InMemoryEmbeddingCache {
    fn get_raw(&self, key: &str) -> Option<String> {
        use movie_rec_engine::EmbeddingCache;
        self.get(key).unwrap()
    }
}
