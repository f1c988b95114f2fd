//! Entity resolution: raw free-text name in, canonical destination id out.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{person_key, EntityCache, NameIndex};
use crate::constants::{DEFAULT_MIN_NAME_LENGTH, PLACEHOLDER_WORK_PREFIX};
use crate::corrections::CorrectionMap;
use crate::decision::{Candidate, Decider, Decision, Prompt, Rejection};
use crate::error::{MigrationError, Result};
use crate::normalize::normalize;
use crate::oracle::Oracle;
use crate::segment::{contains_filler, is_filler_value, split_composite};
use crate::storage::Storage;
use crate::types::{Category, EntityId, EntityKind, PersonName, WorkKey, WorkRow};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub min_name_length: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            min_name_length: DEFAULT_MIN_NAME_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Field was blank; not an error
    Empty,
    Rejected(Rejection),
    /// Several entities share the family name and none was chosen
    Ambiguous,
    /// The decider chose not to create the entity
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(EntityId),
    Created(EntityId),
    Skipped(SkipReason),
}

impl Resolution {
    pub fn id(self) -> Option<EntityId> {
        match self {
            Resolution::Found(id) | Resolution::Created(id) => Some(id),
            Resolution::Skipped(_) => None,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, Resolution::Created(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    pub created: BTreeMap<Category, usize>,
    pub found: usize,
    pub skipped: usize,
    pub placeholders: usize,
}

impl ResolverStats {
    pub fn total_created(&self) -> usize {
        self.created.values().sum()
    }
}

/// What to do after the decider answered a rejection
enum Step {
    Proceed,
    Retry(String),
    Use(EntityId),
    Stop(SkipReason),
}

/// Resolution session for one run: owns the cache, the name index and the
/// placeholder counter, all rebuilt from the destination at startup.
pub struct Resolver {
    storage: Arc<dyn Storage>,
    corrections: CorrectionMap,
    decider: Box<dyn Decider>,
    settings: ResolverSettings,
    cache: EntityCache,
    index: NameIndex,
    placeholder_counter: u32,
    stats: ResolverStats,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("storage", &"<Arc<dyn Storage>>")
            .field("corrections", &self.corrections.len())
            .field("placeholder_counter", &self.placeholder_counter)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Resolver {
    /// Build the cache and name index from every existing destination row
    pub async fn bootstrap(
        storage: Arc<dyn Storage>,
        corrections: CorrectionMap,
        decider: Box<dyn Decider>,
        settings: ResolverSettings,
    ) -> Result<Self> {
        let mut cache = EntityCache::new();
        let mut index = NameIndex::new();

        for category in Category::PEOPLE {
            let rows = storage.load_people(category).await?;
            cache.load_people(category, &rows);
            index.load(category, &rows);
        }
        for category in Category::NAMED {
            let rows = storage.load_named(category).await?;
            cache.load_named(category, &rows);
        }
        let works = storage.load_works().await?;
        cache.load_works(&works);
        let placeholder_counter = highest_placeholder_number(&works);

        for category in Category::ALL {
            debug!(category = %category, entries = cache.len(category), "Cache pre-populated");
        }
        info!(
            works = works.len(),
            placeholder_counter,
            corrections = corrections.len(),
            "Resolver ready"
        );

        Ok(Self {
            storage,
            corrections,
            decider,
            settings,
            cache,
            index,
            placeholder_counter,
            stats: ResolverStats::default(),
        })
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Resolve a raw value of `category` to an entity id, creating the
    /// entity when no known one matches. Works resolve without a composer.
    pub async fn resolve(&mut self, category: Category, raw: &str) -> Result<Resolution> {
        if category.kind() == EntityKind::Work {
            return self.resolve_work(raw, None).await;
        }

        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Resolution::Skipped(SkipReason::Empty));
        }

        let corrected = self.corrections.apply(raw);
        let authorized = corrected.authorized;
        if authorized && corrected.value != raw {
            debug!(category = %category, raw, corrected = %corrected.value, "Applied correction");
        }
        let mut value = corrected.value;

        loop {
            let mut overridden = false;

            let key = identity_key(category, &value);
            if key.is_empty() {
                return Ok(self.skip(category, &value, SkipReason::Empty));
            }
            if let Some(id) = self.cache.get(category, &key) {
                self.stats.found += 1;
                return Ok(Resolution::Found(id));
            }

            if !authorized {
                if let Some(rejection) = self.validate(category, &value) {
                    match self.after_rejection(category, &value, rejection) {
                        Step::Proceed => overridden = true,
                        Step::Retry(new_value) => {
                            value = new_value;
                            continue;
                        }
                        Step::Use(id) => return Ok(self.use_existing(category, key, id)),
                        Step::Stop(reason) => return Ok(self.skip(category, &value, reason)),
                    }
                }
            }

            let person = category.is_person().then(|| PersonName::parse(&value));

            if let Some(name) = person.as_ref().filter(|name| !name.has_given_name()) {
                let family_key = normalize(&name.family_name);
                let ids = self.index.candidates(category, &family_key);
                match ids.as_slice() {
                    [] => {}
                    [id] => {
                        debug!(category = %category, value = %value, id, "Resolved by family name");
                        return Ok(self.use_existing(category, key, *id));
                    }
                    _ => {
                        let candidates: Vec<Candidate> = self
                            .index
                            .full_names(category, &family_key)
                            .into_iter()
                            .map(|(full_name, id)| Candidate { id, full_name })
                            .collect();
                        let prompt = Prompt::Ambiguous {
                            category,
                            value: &value,
                            candidates: &candidates,
                        };
                        match self.decider.decide(&prompt) {
                            Decision::UseExisting(id) => return Ok(self.use_existing(category, key, id)),
                            Decision::CreateNew => overridden = true,
                            Decision::Retry(new_value) => {
                                value = new_value;
                                continue;
                            }
                            Decision::Skip => {
                                return Ok(self.skip(category, &value, SkipReason::Ambiguous));
                            }
                        }
                    }
                }
            }

            let auto_authorized = person.as_ref().map_or(true, PersonName::has_given_name);
            if !authorized && !overridden && !auto_authorized {
                match self.decider.decide(&Prompt::Unconfirmed {
                    category,
                    value: &value,
                }) {
                    Decision::CreateNew => {}
                    Decision::UseExisting(id) => return Ok(self.use_existing(category, key, id)),
                    Decision::Retry(new_value) => {
                        value = new_value;
                        continue;
                    }
                    Decision::Skip => return Ok(self.skip(category, &value, SkipReason::Declined)),
                }
            }

            let id = self.create(category, &value, key).await?;
            return Ok(Resolution::Created(id));
        }
    }

    /// Resolve a work title qualified by its (possibly unknown) composer
    pub async fn resolve_work(&mut self, title: &str, composer_id: Option<EntityId>) -> Result<Resolution> {
        let raw = title.trim();
        if raw.is_empty() {
            return Ok(Resolution::Skipped(SkipReason::Empty));
        }

        let corrected = self.corrections.apply(raw);
        let authorized = corrected.authorized;
        let mut value = corrected.value;

        loop {
            let key = WorkKey::new(normalize(&value), composer_id);
            if key.title.is_empty() {
                return Ok(self.skip(Category::Work, &value, SkipReason::Empty));
            }
            if let Some(id) = self.cache.get_work(&key) {
                self.stats.found += 1;
                return Ok(Resolution::Found(id));
            }

            if !authorized {
                if let Some(rejection) = self.validate(Category::Work, &value) {
                    match self.after_rejection(Category::Work, &value, rejection) {
                        Step::Proceed => {}
                        Step::Retry(new_value) => {
                            value = new_value;
                            continue;
                        }
                        Step::Use(id) => {
                            self.cache.insert_work(key, id);
                            self.stats.found += 1;
                            return Ok(Resolution::Found(id));
                        }
                        Step::Stop(reason) => return Ok(self.skip(Category::Work, &value, reason)),
                    }
                }
            }

            let id = self.create_work(&value, key).await?;
            return Ok(Resolution::Created(id));
        }
    }

    /// Resolve the works a record performed, composer first.
    ///
    /// A composite composer field is handed to the oracle when one is
    /// given. Without an oracle answer only the first composer is paired
    /// with the work text, and every further composer gets a placeholder
    /// work so its reference is not lost.
    pub async fn resolve_works(
        &mut self,
        composer_text: &str,
        work_text: &str,
        notes: &str,
        oracle: Option<&dyn Oracle>,
    ) -> Result<Vec<EntityId>> {
        let work_text = work_text.trim();
        if work_text.is_empty() {
            return Ok(Vec::new());
        }

        let segments = split_composite(composer_text);
        let mut work_ids = Vec::new();

        if let Some(oracle) = oracle.filter(|_| segments.len() > 1 || contains_filler(composer_text)) {
            match oracle.extract(composer_text, work_text, notes).await {
                Ok(pairs) if !pairs.is_empty() => {
                    for pair in pairs {
                        let composer_id = self.resolve(Category::Composer, &pair.composer).await?.id();
                        if let Some(id) = self.resolve_work(&pair.work, composer_id).await?.id() {
                            push_unique(&mut work_ids, id);
                        }
                    }
                    if !work_ids.is_empty() {
                        return Ok(work_ids);
                    }
                    info!(composers = composer_text, "Oracle pairs resolved to nothing, using first composer");
                }
                Ok(_) => info!(composers = composer_text, "Oracle had no answer, using first composer"),
                Err(e) => warn!(composers = composer_text, "Oracle failed, using first composer: {}", e),
            }
        }

        let mut segments = segments.into_iter();
        let first_composer = match segments.next() {
            Some(first) => self.resolve(Category::Composer, &first).await?.id(),
            None => None,
        };
        if let Some(id) = self.resolve_work(work_text, first_composer).await?.id() {
            push_unique(&mut work_ids, id);
        }

        let mut attributed: Vec<EntityId> = first_composer.into_iter().collect();
        for extra in segments {
            let Some(composer_id) = self.resolve(Category::Composer, &extra).await?.id() else {
                continue;
            };
            if attributed.contains(&composer_id) {
                continue;
            }
            attributed.push(composer_id);
            let id = self.create_placeholder(composer_id).await?;
            push_unique(&mut work_ids, id);
        }

        Ok(work_ids)
    }

    fn validate(&self, category: Category, value: &str) -> Option<Rejection> {
        if is_filler_value(value) {
            return Some(Rejection::Filler);
        }
        if value.chars().count() < self.settings.min_name_length {
            return Some(Rejection::TooShort {
                min_length: self.settings.min_name_length,
            });
        }
        if category.is_person() && PersonName::parse(value).family_name.is_empty() {
            return Some(Rejection::MissingFamilyName);
        }
        None
    }

    fn after_rejection(&mut self, category: Category, value: &str, rejection: Rejection) -> Step {
        match self.decider.decide(&Prompt::Rejected {
            category,
            value,
            rejection,
        }) {
            Decision::CreateNew if rejection.can_override() => Step::Proceed,
            Decision::Retry(new_value) => Step::Retry(new_value),
            Decision::UseExisting(id) => Step::Use(id),
            Decision::CreateNew | Decision::Skip => Step::Stop(SkipReason::Rejected(rejection)),
        }
    }

    fn use_existing(&mut self, category: Category, key: String, id: EntityId) -> Resolution {
        self.cache.insert(category, key, id);
        self.stats.found += 1;
        Resolution::Found(id)
    }

    fn skip(&mut self, category: Category, value: &str, reason: SkipReason) -> Resolution {
        self.stats.skipped += 1;
        info!(category = %category, value, reason = ?reason, "Skipped reference");
        Resolution::Skipped(reason)
    }

    async fn create(&mut self, category: Category, value: &str, key: String) -> Result<EntityId> {
        let id = match category.kind() {
            EntityKind::Person => {
                let mut name = PersonName::parse(value);
                if name.family_name.is_empty() {
                    // accepted by an operator as a single name
                    name = PersonName::new("", name.given_name);
                }
                let id = self.storage.insert_person(category, &name).await?;
                self.index.insert(category, &name, id);
                id
            }
            EntityKind::Named => self.storage.insert_named(category, value).await?,
            EntityKind::Work => {
                return Err(MigrationError::storage("works are created through resolve_work"));
            }
        };

        self.cache.insert(category, key, id);
        *self.stats.created.entry(category).or_default() += 1;
        info!(category = %category, value, id, "Created entity");
        Ok(id)
    }

    async fn create_work(&mut self, title: &str, key: WorkKey) -> Result<EntityId> {
        let id = self.storage.insert_work(title, key.composer_id).await?;
        info!(category = %Category::Work, value = title, composer_id = ?key.composer_id, id, "Created entity");
        self.cache.insert_work(key, id);
        *self.stats.created.entry(Category::Work).or_default() += 1;
        Ok(id)
    }

    async fn create_placeholder(&mut self, composer_id: EntityId) -> Result<EntityId> {
        self.placeholder_counter = self
            .placeholder_counter
            .checked_add(1)
            .ok_or_else(|| MigrationError::storage("placeholder work numbers exhausted"))?;
        let title = format!("{}{}", PLACEHOLDER_WORK_PREFIX, self.placeholder_counter);
        let key = WorkKey::new(normalize(&title), Some(composer_id));
        if let Some(id) = self.cache.get_work(&key) {
            return Ok(id);
        }
        let id = self.create_work(&title, key).await?;
        self.stats.placeholders += 1;
        Ok(id)
    }
}

/// Identity key of a person-like or simple named value
pub fn identity_key(category: Category, value: &str) -> String {
    match category.kind() {
        EntityKind::Person => person_key(&PersonName::parse(value)),
        EntityKind::Named | EntityKind::Work => normalize(value),
    }
}

fn highest_placeholder_number(works: &[WorkRow]) -> u32 {
    works
        .iter()
        .filter_map(|w| w.title.strip_prefix(PLACEHOLDER_WORK_PREFIX))
        .filter_map(|n| n.trim().parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

fn push_unique(ids: &mut Vec<EntityId>, id: EntityId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::BatchDecider;
    use crate::oracle::WorkAttribution;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    async fn resolver_with(storage: &InMemoryStorage, corrections: CorrectionMap) -> Resolver {
        Resolver::bootstrap(
            Arc::new(storage.clone()),
            corrections,
            Box::new(BatchDecider::default()),
            ResolverSettings::default(),
        )
        .await
        .unwrap()
    }

    /// Replays scripted decisions, recording every prompt it saw
    struct ScriptedDecider {
        answers: VecDeque<Decision>,
        seen: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Decider for ScriptedDecider {
        fn decide(&mut self, prompt: &Prompt<'_>) -> Decision {
            self.seen.lock().unwrap().push(format!("{prompt:?}"));
            self.answers.pop_front().unwrap_or(Decision::Skip)
        }
    }

    struct FixedOracle(std::result::Result<Vec<WorkAttribution>, String>);

    #[async_trait]
    impl Oracle for FixedOracle {
        async fn extract(&self, _: &str, _: &str, _: &str) -> Result<Vec<WorkAttribution>> {
            self.0.clone().map_err(MigrationError::oracle)
        }
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_per_key() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let first = resolver.resolve(Category::Composer, "Ludwig van Beethoven").await.unwrap();
        let second = resolver.resolve(Category::Composer, "Ludwig van Beethoven").await.unwrap();
        let third = resolver.resolve(Category::Composer, "LUDWIG V. BEETHOVEN").await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, Resolution::Found(first.id().unwrap()));
        assert_eq!(third.id(), first.id());
        assert_eq!(storage.count(Category::Composer), 1);
    }

    #[tokio::test]
    async fn test_empty_value_is_not_an_error() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        assert_eq!(
            resolver.resolve(Category::Venue, "   ").await.unwrap(),
            Resolution::Skipped(SkipReason::Empty)
        );
    }

    #[tokio::test]
    async fn test_cache_is_built_from_existing_rows() {
        let storage = InMemoryStorage::new();
        let id = storage.seed_named(Category::Orchestra, "Wiener Philharmoniker");
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let resolution = resolver.resolve(Category::Orchestra, "wiener philharmoniker").await.unwrap();
        assert_eq!(resolution, Resolution::Found(id));
        assert_eq!(storage.count(Category::Orchestra), 1);
    }

    #[tokio::test]
    async fn test_bare_family_name_with_single_candidate() {
        let storage = InMemoryStorage::new();
        let id = storage.seed_person(Category::Composer, PersonName::new("Ludwig van", "Beethoven"));
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        assert_eq!(
            resolver.resolve(Category::Composer, "Beethoven").await.unwrap(),
            Resolution::Found(id)
        );
        // cached under the bare key from now on
        assert_eq!(resolver.cache().get(Category::Composer, "beethoven"), Some(id));
        assert_eq!(storage.count(Category::Composer), 1);
    }

    #[tokio::test]
    async fn test_bare_family_name_with_two_candidates_is_skipped_in_batch() {
        let storage = InMemoryStorage::new();
        storage.seed_person(Category::Composer, PersonName::new("Ludwig van", "Beethoven"));
        storage.seed_person(Category::Composer, PersonName::new("Johann", "Beethoven"));
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        assert_eq!(
            resolver.resolve(Category::Composer, "Beethoven").await.unwrap(),
            Resolution::Skipped(SkipReason::Ambiguous)
        );
        assert_eq!(storage.count(Category::Composer), 2);
    }

    #[tokio::test]
    async fn test_ambiguity_operator_selection_is_cached() {
        let storage = InMemoryStorage::new();
        storage.seed_person(Category::Composer, PersonName::new("Johann Sebastian", "Bach"));
        let cpe = storage.seed_person(Category::Composer, PersonName::new("Carl Philipp Emanuel", "Bach"));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let decider = ScriptedDecider {
            answers: VecDeque::from([Decision::UseExisting(cpe)]),
            seen: seen.clone(),
        };
        let mut resolver = Resolver::bootstrap(
            Arc::new(storage.clone()),
            CorrectionMap::default(),
            Box::new(decider),
            ResolverSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolver.resolve(Category::Composer, "Bach").await.unwrap(), Resolution::Found(cpe));
        assert_eq!(resolver.resolve(Category::Composer, "bach").await.unwrap(), Resolution::Found(cpe));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    async fn scripted_resolver(
        storage: &InMemoryStorage,
        answers: impl IntoIterator<Item = Decision>,
    ) -> (Resolver, Arc<std::sync::Mutex<Vec<String>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let decider = ScriptedDecider {
            answers: answers.into_iter().collect(),
            seen: seen.clone(),
        };
        let resolver = Resolver::bootstrap(
            Arc::new(storage.clone()),
            CorrectionMap::default(),
            Box::new(decider),
            ResolverSettings::default(),
        )
        .await
        .unwrap();
        (resolver, seen)
    }

    #[tokio::test]
    async fn test_operator_accepts_short_value() {
        let storage = InMemoryStorage::new();
        let (mut resolver, seen) = scripted_resolver(&storage, [Decision::CreateNew]).await;

        let resolution = resolver.resolve(Category::Orchestra, "NDR").await.unwrap();
        assert!(resolution.is_created());
        assert_eq!(storage.count(Category::Orchestra), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].starts_with("Rejected"));
    }

    #[tokio::test]
    async fn test_filler_rejection_cannot_be_overridden() {
        let storage = InMemoryStorage::new();
        let (mut resolver, _) = scripted_resolver(&storage, [Decision::CreateNew, Decision::CreateNew]).await;

        for raw in ["u.a.", "Solisten etc."] {
            assert_eq!(
                resolver.resolve(Category::Soloist, raw).await.unwrap(),
                Resolution::Skipped(SkipReason::Rejected(Rejection::Filler))
            );
        }
        assert_eq!(storage.count(Category::Soloist), 0);
    }

    #[tokio::test]
    async fn test_operator_forces_new_entity_on_ambiguity() {
        let storage = InMemoryStorage::new();
        let sebastian = storage.seed_person(Category::Composer, PersonName::new("Johann Sebastian", "Bach"));
        let emanuel = storage.seed_person(Category::Composer, PersonName::new("Carl Philipp Emanuel", "Bach"));
        let (mut resolver, seen) = scripted_resolver(&storage, [Decision::CreateNew]).await;

        let created = resolver.resolve(Category::Composer, "Bach").await.unwrap();
        let id = created.id().unwrap();
        assert!(created.is_created());
        assert_ne!(id, sebastian);
        assert_ne!(id, emanuel);
        assert_eq!(storage.count(Category::Composer), 3);

        // later occurrences reuse the new entity without asking again
        assert_eq!(resolver.resolve(Category::Composer, "Bach").await.unwrap(), Resolution::Found(id));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].starts_with("Ambiguous"));
    }

    #[tokio::test]
    async fn test_short_value_is_rejected_in_batch() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        assert_eq!(
            resolver.resolve(Category::Conductor, "Abc").await.unwrap(),
            Resolution::Skipped(SkipReason::Rejected(Rejection::TooShort { min_length: 4 }))
        );
        assert_eq!(storage.count(Category::Conductor), 0);
    }

    #[tokio::test]
    async fn test_filler_value_is_rejected() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        for raw in ["u.a.", "Solisten etc.", "Chor u. a."] {
            assert_eq!(
                resolver.resolve(Category::Soloist, raw).await.unwrap(),
                Resolution::Skipped(SkipReason::Rejected(Rejection::Filler))
            );
        }
        assert_eq!(storage.count(Category::Soloist), 0);
    }

    #[tokio::test]
    async fn test_correction_authorizes_short_value() {
        let storage = InMemoryStorage::new();
        let corrections = CorrectionMap::new([("NDR".to_string(), "NDR".to_string())]);
        let mut resolver = resolver_with(&storage, corrections).await;

        assert!(resolver.resolve(Category::Orchestra, "NDR").await.unwrap().is_created());
    }

    #[tokio::test]
    async fn test_correction_merges_spellings() {
        let storage = InMemoryStorage::new();
        let corrections = CorrectionMap::new([(
            "Karajan, H.".to_string(),
            "Herbert von Karajan".to_string(),
        )]);
        let mut resolver = resolver_with(&storage, corrections).await;

        let canonical = resolver.resolve(Category::Conductor, "Herbert von Karajan").await.unwrap();
        let corrected = resolver.resolve(Category::Conductor, "Karajan, H.").await.unwrap();
        assert_eq!(corrected, Resolution::Found(canonical.id().unwrap()));
        assert_eq!(storage.count(Category::Conductor), 1);
    }

    #[tokio::test]
    async fn test_unknown_family_name_follows_batch_policy() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        assert!(resolver.resolve(Category::Soloist, "Sting").await.unwrap().is_created());

        let strict = Resolver::bootstrap(
            Arc::new(InMemoryStorage::new()),
            CorrectionMap::default(),
            Box::new(BatchDecider {
                allow_family_only: false,
            }),
            ResolverSettings::default(),
        )
        .await;
        let mut strict = strict.unwrap();
        assert_eq!(
            strict.resolve(Category::Soloist, "Sting").await.unwrap(),
            Resolution::Skipped(SkipReason::Declined)
        );
    }

    #[tokio::test]
    async fn test_edit_and_retry_rechecks_cache() {
        let storage = InMemoryStorage::new();
        let id = storage.seed_named(Category::Venue, "Musikverein Wien");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let decider = ScriptedDecider {
            answers: VecDeque::from([Decision::Retry("Musikverein Wien".to_string())]),
            seen,
        };
        let mut resolver = Resolver::bootstrap(
            Arc::new(storage.clone()),
            CorrectionMap::default(),
            Box::new(decider),
            ResolverSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolver.resolve(Category::Venue, "MV").await.unwrap(), Resolution::Found(id));
        assert_eq!(storage.count(Category::Venue), 1);
    }

    #[tokio::test]
    async fn test_work_identity_is_composer_qualified() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let beethoven = resolver.resolve(Category::Composer, "Ludwig van Beethoven").await.unwrap().id();
        let schubert = resolver.resolve(Category::Composer, "Franz Schubert").await.unwrap().id();

        let a = resolver.resolve_work("Symphony No. 5", beethoven).await.unwrap();
        let b = resolver.resolve_work("Symphony No. 5", schubert).await.unwrap();
        let c = resolver.resolve_work("symphony no. 5", beethoven).await.unwrap();
        let d = resolver.resolve_work("Symphony No. 5", None).await.unwrap();
        let e = resolver.resolve(Category::Work, "Symphony No. 5").await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(c, Resolution::Found(a.id().unwrap()));
        assert!(d.is_created());
        assert_eq!(e, Resolution::Found(d.id().unwrap()));
        assert_eq!(storage.count(Category::Work), 3);
    }

    #[tokio::test]
    async fn test_first_composer_and_placeholders() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let ids = resolver
            .resolve_works("Ludwig van Beethoven, Wolfgang Amadeus Mozart / Joseph Haydn", "Egmont", "", None)
            .await
            .unwrap();

        assert_eq!(ids.len(), 3);
        let (title, composer) = storage.work(ids[0]).unwrap();
        assert_eq!(title, "Egmont");
        let beethoven = storage.person(Category::Composer, composer.unwrap()).unwrap();
        assert_eq!(beethoven.family_name, "Beethoven");
        assert_eq!(storage.work(ids[1]).unwrap().0, "Todo 1");
        assert_eq!(storage.work(ids[2]).unwrap().0, "Todo 2");
        assert_eq!(resolver.stats().placeholders, 2);
    }

    #[tokio::test]
    async fn test_placeholder_counter_continues_from_existing_rows() {
        let storage = InMemoryStorage::new();
        let haydn = storage.seed_person(Category::Composer, PersonName::new("Joseph", "Haydn"));
        storage.seed_work("Todo 7", Some(haydn));
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let ids = resolver
            .resolve_works("Franz Schubert und Joseph Haydn", "Unvollendete", "", None)
            .await
            .unwrap();
        assert_eq!(storage.work(ids[1]).unwrap().0, "Todo 8");
    }

    #[tokio::test]
    async fn test_exhausted_placeholder_counter_is_an_error() {
        let storage = InMemoryStorage::new();
        storage.seed_work(&format!("Todo {}", u32::MAX), None);
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;

        let result = resolver
            .resolve_works("Franz Schubert, Joseph Haydn", "Unvollendete", "", None)
            .await;
        assert!(matches!(result, Err(MigrationError::Storage { .. })));

        // the session stays usable for the next record
        let ids = resolver
            .resolve_works("Franz Schubert", "Unvollendete", "", None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_oracle_pairs_are_resolved() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        let oracle = FixedOracle(Ok(vec![
            WorkAttribution {
                composer: "Johannes Brahms".to_string(),
                work: "Violinkonzert D-Dur".to_string(),
            },
            WorkAttribution {
                composer: "Max Bruch".to_string(),
                work: "Schottische Fantasie".to_string(),
            },
        ]));

        let ids = resolver
            .resolve_works("Brahms, Bruch", "Violinkonzert, Fantasie", "", Some(&oracle))
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(storage.work(ids[1]).unwrap().0, "Schottische Fantasie");
        assert_eq!(resolver.stats().placeholders, 0);
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back_to_first_composer() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        let oracle = FixedOracle(Err("timeout".to_string()));

        let ids = resolver
            .resolve_works("Johannes Brahms u.a.", "Ein deutsches Requiem", "", Some(&oracle))
            .await
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(storage.work(ids[0]).unwrap().0, "Ein deutsches Requiem");
    }

    #[tokio::test]
    async fn test_oracle_not_consulted_for_single_composer() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        let oracle = FixedOracle(Ok(vec![WorkAttribution {
            composer: "Someone Else".to_string(),
            work: "Something Else".to_string(),
        }]));

        let ids = resolver
            .resolve_works("Anton Bruckner", "Symphonie Nr. 8", "", Some(&oracle))
            .await
            .unwrap();
        assert_eq!(storage.work(ids[0]).unwrap().0, "Symphonie Nr. 8");
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let storage = InMemoryStorage::new();
        let mut resolver = resolver_with(&storage, CorrectionMap::default()).await;
        // composer id 999 does not exist, so the work insert fails
        assert!(resolver.resolve_work("Sinfonia concertante", Some(999)).await.is_err());
    }

    #[test]
    fn test_highest_placeholder_number() {
        let rows = [
            WorkRow {
                id: 1,
                title: "Todo 3".to_string(),
                composer_id: None,
            },
            WorkRow {
                id: 2,
                title: "Todo 12".to_string(),
                composer_id: None,
            },
            WorkRow {
                id: 3,
                title: "Todo later".to_string(),
                composer_id: None,
            },
        ];
        assert_eq!(highest_placeholder_number(&rows), 12);
        assert_eq!(highest_placeholder_number(&[]), 0);
    }
}
