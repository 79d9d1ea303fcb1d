#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use engine::{
    Account, BudgetMatch, Classification, ClassifierGateway, Credential, Engine, EngineError,
    EngineSettings, FeedAccount, FeedPage, FeedTransaction, MoneyCents, PageRequest,
    TransactionFacts, TransactionFeed,
};
use migration::MigratorTrait;

pub const USER: &str = "alice";

/// Feed answering from pages scripted per `(account, cursor)`. Unscripted
/// requests get an empty final page.
#[derive(Default)]
pub struct ScriptedFeed {
    pages: Mutex<HashMap<(String, Option<String>), FeedPage>>,
    failing: Mutex<HashSet<(String, Option<String>)>>,
    accounts: Mutex<HashMap<String, Vec<FeedAccount>>>,
    accounts_fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFeed {
    pub fn add_account(&self, token: &str, external_id: &str, name: &str) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(token.to_string()).or_default().push(FeedAccount {
            account_id: external_id.to_string(),
            name: name.to_string(),
            account_type: "depository".to_string(),
            subtype: Some("checking".to_string()),
            current_balance: Some(MoneyCents::new(100_000)),
            available_balance: Some(MoneyCents::new(95_000)),
        });
    }

    pub fn script(&self, account: &str, cursor: Option<&str>, page: FeedPage) {
        self.pages
            .lock()
            .unwrap()
            .insert((account.to_string(), cursor.map(str::to_string)), page);
    }

    pub fn fail_at(&self, account: &str, cursor: Option<&str>) {
        self.failing
            .lock()
            .unwrap()
            .insert((account.to_string(), cursor.map(str::to_string)));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn fail_accounts(&self, fail: bool) {
        self.accounts_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionFeed for ScriptedFeed {
    async fn fetch_page(
        &self,
        _credential: &Credential,
        request: PageRequest<'_>,
    ) -> Result<FeedPage, EngineError> {
        let key = (
            request.account_filter.unwrap_or_default().to_string(),
            request.cursor.map(str::to_string),
        );
        self.calls.lock().unwrap().push(key.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&key) {
            return Err(EngineError::Feed("provider unavailable".to_string()));
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_accounts(&self, credential: &Credential) -> Result<Vec<FeedAccount>, EngineError> {
        if self.accounts_fail.load(Ordering::SeqCst) {
            return Err(EngineError::Feed("balance endpoint down".to_string()));
        }
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(credential.expose()).cloned().unwrap_or_default())
    }
}

/// Classifier with fixed answers: categories come from a name lookup (rule
/// overrides win when rules are given) and a budget matches when the
/// transaction name contains the filter, ignoring case.
#[derive(Default)]
pub struct ScriptedClassifier {
    categories: Mutex<HashMap<String, String>>,
    rule_overrides: Mutex<HashMap<String, String>>,
    fail_classify: AtomicBool,
    fail_match: AtomicBool,
    match_delay: Mutex<Option<Duration>>,
    match_calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn categorize(&self, name: &str, category: &str) {
        self.categories
            .lock()
            .unwrap()
            .insert(name.to_string(), category.to_string());
    }

    pub fn override_with_rules(&self, name: &str, category: &str) {
        self.rule_overrides
            .lock()
            .unwrap()
            .insert(name.to_string(), category.to_string());
    }

    pub fn fail_classify(&self, fail: bool) {
        self.fail_classify.store(fail, Ordering::SeqCst);
    }

    pub fn fail_match(&self, fail: bool) {
        self.fail_match.store(fail, Ordering::SeqCst);
    }

    pub fn set_match_delay(&self, delay: Duration) {
        *self.match_delay.lock().unwrap() = Some(delay);
    }

    pub fn match_calls(&self) -> usize {
        self.match_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierGateway for ScriptedClassifier {
    async fn classify(
        &self,
        transactions: &[TransactionFacts],
        rules: Option<&str>,
    ) -> Result<Vec<Classification>, EngineError> {
        if self.fail_classify.load(Ordering::SeqCst) {
            return Err(EngineError::Classifier("model overloaded".to_string()));
        }
        let categories = self.categories.lock().unwrap();
        let overrides = self.rule_overrides.lock().unwrap();
        Ok(transactions
            .iter()
            .filter_map(|facts| {
                let from_rules = rules.and_then(|_| overrides.get(&facts.name));
                from_rules
                    .or_else(|| categories.get(&facts.name))
                    .map(|category| Classification {
                        transaction_id: facts.transaction_id.clone(),
                        category: category.clone(),
                    })
            })
            .collect())
    }

    async fn match_budget(
        &self,
        transactions: &[TransactionFacts],
        filter: &str,
    ) -> Result<Vec<BudgetMatch>, EngineError> {
        self.match_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.match_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_match.load(Ordering::SeqCst) {
            return Err(EngineError::Classifier("model overloaded".to_string()));
        }
        let needle = filter.to_lowercase();
        Ok(transactions
            .iter()
            .map(|facts| BudgetMatch {
                transaction_id: facts.transaction_id.clone(),
                matches: facts.name.to_lowercase().contains(&needle),
            })
            .collect())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub feed: Arc<ScriptedFeed>,
    pub classifier: Arc<ScriptedClassifier>,
}

impl Harness {
    /// Engine that runs jobs inline, so every call has finished its side
    /// effects when it returns.
    pub async fn new() -> Self {
        Self::with_settings(EngineSettings::default()).await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let feed = Arc::new(ScriptedFeed::default());
        let classifier = Arc::new(ScriptedClassifier::default());
        let engine = Engine::builder()
            .database(db.clone())
            .feed(feed.clone())
            .classifier(classifier.clone())
            .settings(settings)
            .background_jobs(false)
            .build()
            .await
            .unwrap();
        Self {
            engine,
            db,
            feed,
            classifier,
        }
    }

    /// Second engine on the same database with a background worker.
    pub async fn background_engine(&self, queue_capacity: usize) -> Engine {
        Engine::builder()
            .database(self.db.clone())
            .feed(self.feed.clone())
            .classifier(self.classifier.clone())
            .settings(EngineSettings {
                queue_capacity,
                ..EngineSettings::default()
            })
            .build()
            .await
            .unwrap()
    }

    /// Links a connection whose accounts are the given external ids. The
    /// post-link sync runs inline against empty pages.
    pub async fn link(&self, environment: &str, external_ids: &[&str]) -> (Uuid, Vec<Account>) {
        let token = format!("access-{}", external_ids.join("-"));
        for external_id in external_ids {
            self.feed
                .add_account(&token, external_id, &format!("Account {external_id}"));
        }
        let connection_id = self
            .engine
            .link_connection(USER, "First Bank", environment, Credential::new(token))
            .await
            .unwrap();
        let accounts = self
            .engine
            .accounts_for_connection(connection_id, USER)
            .await
            .unwrap();
        self.feed.clear_calls();
        (connection_id, accounts)
    }

    pub async fn credential(&self, connection_id: Uuid) -> Credential {
        self.engine
            .connection(connection_id, USER)
            .await
            .unwrap()
            .credential
    }

    pub async fn sync(&self, account: &Account) -> Result<engine::AccountSyncReport, EngineError> {
        self.engine
            .sync_account(
                account.id,
                &Credential::new("access-token"),
                USER,
                account.connection_id,
            )
            .await
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn feed_tx(id: &str, account: &str, day: NaiveDate, name: &str, cents: i64) -> FeedTransaction {
    FeedTransaction {
        transaction_id: id.to_string(),
        account_id: account.to_string(),
        date: day,
        name: name.to_string(),
        merchant_name: None,
        amount: MoneyCents::new(cents),
        provider_category: None,
        pending: false,
    }
}

pub fn page(added: Vec<FeedTransaction>, next_cursor: &str, has_more: bool) -> FeedPage {
    FeedPage {
        added,
        modified: Vec::new(),
        removed: Vec::new(),
        next_cursor: Some(next_cursor.to_string()),
        has_more,
    }
}
