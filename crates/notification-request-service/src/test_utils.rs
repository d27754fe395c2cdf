//! 测试工具
//!
//! 提供仓储 trait 的内存实现、固定数据的外部服务与可编排的发布器，
//! 供单元测试与集成测试在没有 Postgres/Kafka 的情况下驱动完整流程。
//! 内存仓储的组合写入在同一把锁内完成，与 Postgres 事务语义一致。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_shared::config::{IdempotencyConfig, OutboxQueueConfig, TemplateConfig};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::composer::MessageComposer;
use crate::dto::{
    ContentDto, NotificationRequestCommand, RecipientsDto, RequesterDto, SenderInfoDto,
};
use crate::error::{NotificationError, Result};
use crate::idempotency::IdempotencyGuard;
use crate::models::{
    IdempotencyCompletion, IdempotencyRecord, MessageStatus, NotificationMessage,
    NotificationRequest, NotificationType, OutboxClaim, OutboxKind, OutboxRecord, OutboxStatus,
    RequesterType, TemplateDefinition, UserConfig,
};
use crate::outbox::{OutboxRetryPolicy, OutboxSignal};
use crate::providers::{AudienceProvider, TemplateDefinitionProvider, UserConfigProvider};
use crate::publisher::DispatchPublisher;
use crate::repository::{
    IdempotencyRepositoryTrait, MessageRepositoryTrait, OutboxRepositoryTrait,
    RequestRepositoryTrait,
};
use crate::resolver::RecipientResolver;
use crate::service::{MessageOutboxHandler, NotificationIntakeService, RequestOutboxHandler};
use crate::template::TemplateRenderer;
use crate::worker::{OutboxPoller, StaleClaimSweeper};

// ---------------------------------------------------------------------------
// 内存仓储
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    requests: HashMap<Uuid, NotificationRequest>,
    messages: HashMap<Uuid, NotificationMessage>,
    request_outbox: HashMap<Uuid, OutboxRecord>,
    message_outbox: HashMap<Uuid, OutboxRecord>,
    idempotency: HashMap<(String, String), IdempotencyRecord>,
}

impl StoreState {
    fn outbox_mut(&mut self, kind: OutboxKind) -> &mut HashMap<Uuid, OutboxRecord> {
        match kind {
            OutboxKind::Request => &mut self.request_outbox,
            OutboxKind::Message => &mut self.message_outbox,
        }
    }

    fn outbox(&self, kind: OutboxKind) -> &HashMap<Uuid, OutboxRecord> {
        match kind {
            OutboxKind::Request => &self.request_outbox,
            OutboxKind::Message => &self.message_outbox,
        }
    }

    /// 与 `DELETE ... WHERE id = $1 AND claim_owner = $2` 相同的条件
    fn check_claim(&self, kind: OutboxKind, claim: &OutboxClaim) -> Result<()> {
        match self.outbox(kind).get(&claim.outbox_id) {
            Some(record) if record.claim_owner.as_deref() == Some(claim.owner.as_str()) => Ok(()),
            _ => Err(NotificationError::ClaimLost {
                outbox_id: claim.outbox_id,
            }),
        }
    }

    /// 已结束的请求不再被改写
    fn check_request_open(&self, request: &NotificationRequest) -> Result<()> {
        match self.requests.get(&request.id) {
            None => Err(NotificationError::not_found("NotificationRequest", request.id)),
            Some(existing) if existing.status.is_terminal() => {
                Err(NotificationError::PolicyViolation(format!(
                    "notification request {} is missing or already terminal",
                    request.id
                )))
            }
            Some(_) => Ok(()),
        }
    }

    fn check_message_pending(&self, message: &NotificationMessage) -> Result<()> {
        match self.messages.get(&message.id) {
            Some(existing) if existing.status == MessageStatus::Pending => Ok(()),
            _ => Err(NotificationError::PolicyViolation(format!(
                "notification message {} is missing or already settled",
                message.id
            ))),
        }
    }
}

/// 全部仓储 trait 的内存实现
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 对应一张 Outbox 表的仓储句柄
    pub fn outbox(self: &Arc<Self>, kind: OutboxKind) -> Arc<InMemoryOutbox> {
        Arc::new(InMemoryOutbox {
            store: Arc::clone(self),
            kind,
        })
    }

    pub fn request(&self, id: Uuid) -> Option<NotificationRequest> {
        self.state.lock().requests.get(&id).cloned()
    }

    pub fn requests(&self) -> Vec<NotificationRequest> {
        self.state.lock().requests.values().cloned().collect()
    }

    pub fn messages_for(&self, request_id: Uuid) -> Vec<NotificationMessage> {
        let mut messages: Vec<_> = self
            .state
            .lock()
            .messages
            .values()
            .filter(|m| m.request_id == request_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        messages
    }

    pub fn outbox_records(&self, kind: OutboxKind) -> Vec<OutboxRecord> {
        let mut records: Vec<_> = self.state.lock().outbox(kind).values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn outbox_record(&self, kind: OutboxKind, id: Uuid) -> Option<OutboxRecord> {
        self.state.lock().outbox(kind).get(&id).cloned()
    }

    /// 直接覆盖一条 Outbox 记录，用于模拟崩溃等中间状态
    pub fn put_outbox_record(&self, kind: OutboxKind, record: OutboxRecord) {
        self.state.lock().outbox_mut(kind).insert(record.id, record);
    }

    pub fn idempotency_records(&self) -> Vec<IdempotencyRecord> {
        self.state.lock().idempotency.values().cloned().collect()
    }

    pub fn put_idempotency_record(&self, record: IdempotencyRecord) {
        self.state.lock().idempotency.insert(
            (record.key.clone(), record.operation_type.clone()),
            record,
        );
    }
}

#[async_trait]
impl RequestRepositoryTrait for InMemoryStore {
    async fn find_request(&self, id: Uuid) -> Result<Option<NotificationRequest>> {
        Ok(self.request(id))
    }

    async fn save_request(&self, request: &NotificationRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.check_request_open(request)?;
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn register_request(
        &self,
        request: &NotificationRequest,
        outbox: &OutboxRecord,
        completion: &IdempotencyCompletion,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let id = (completion.key.clone(), completion.operation_type.clone());
        match state.idempotency.get_mut(&id) {
            Some(record)
                if record.result.is_none() && record.created_at == completion.claimed_at =>
            {
                record.result = Some(completion.result.clone());
            }
            _ => {
                return Err(NotificationError::DuplicateRequest(
                    crate::idempotency::IN_FLIGHT_MESSAGE.to_string(),
                ));
            }
        }
        state.requests.insert(request.id, request.clone());
        state.request_outbox.insert(outbox.id, outbox.clone());
        Ok(())
    }

    async fn complete_fan_out(
        &self,
        request: &NotificationRequest,
        messages: &[(NotificationMessage, OutboxRecord)],
        claim: &OutboxClaim,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_claim(OutboxKind::Request, claim)?;
        state.check_request_open(request)?;
        for (message, outbox) in messages {
            state.messages.insert(message.id, message.clone());
            state.message_outbox.insert(outbox.id, outbox.clone());
        }
        state.requests.insert(request.id, request.clone());
        state.request_outbox.remove(&claim.outbox_id);
        Ok(())
    }

    async fn fail_request(
        &self,
        request: &NotificationRequest,
        claim: &OutboxClaim,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_claim(OutboxKind::Request, claim)?;
        state.check_request_open(request)?;
        state.requests.insert(request.id, request.clone());
        state.request_outbox.remove(&claim.outbox_id);
        Ok(())
    }
}

#[async_trait]
impl MessageRepositoryTrait for InMemoryStore {
    async fn find_message(&self, id: Uuid) -> Result<Option<NotificationMessage>> {
        Ok(self.state.lock().messages.get(&id).cloned())
    }

    async fn list_by_request(&self, request_id: Uuid) -> Result<Vec<NotificationMessage>> {
        Ok(self.messages_for(request_id))
    }

    async fn settle_message(
        &self,
        message: &NotificationMessage,
        claim: &OutboxClaim,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_claim(OutboxKind::Message, claim)?;
        state.check_message_pending(message)?;
        state.messages.insert(message.id, message.clone());
        state.message_outbox.remove(&claim.outbox_id);
        Ok(())
    }
}

#[async_trait]
impl IdempotencyRepositoryTrait for InMemoryStore {
    async fn find(&self, key: &str, operation_type: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .state
            .lock()
            .idempotency
            .get(&(key.to_string(), operation_type.to_string()))
            .cloned())
    }

    async fn try_insert_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let id = (key.to_string(), operation_type.to_string());
        if state.idempotency.contains_key(&id) {
            return Ok(false);
        }
        state.idempotency.insert(
            id,
            IdempotencyRecord {
                key: key.to_string(),
                operation_type: operation_type.to_string(),
                result: None,
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn remove_placeholder(
        &self,
        key: &str,
        operation_type: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let id = (key.to_string(), operation_type.to_string());
        if state
            .idempotency
            .get(&id)
            .is_some_and(|r| r.result.is_none() && r.created_at == claimed_at)
        {
            state.idempotency.remove(&id);
        }
        Ok(())
    }

    async fn take_over_stale(
        &self,
        key: &str,
        operation_type: &str,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .idempotency
            .get_mut(&(key.to_string(), operation_type.to_string()))
        {
            Some(record) if record.result.is_none() && record.created_at < stale_before => {
                record.created_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// 单张 Outbox 表的内存句柄
pub struct InMemoryOutbox {
    store: Arc<InMemoryStore>,
    kind: OutboxKind,
}

#[async_trait]
impl OutboxRepositoryTrait for InMemoryOutbox {
    fn kind(&self) -> OutboxKind {
        self.kind
    }

    async fn claim_batch(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>> {
        let mut state = self.store.state.lock();
        let table = state.outbox_mut(self.kind);

        let mut due: Vec<&mut OutboxRecord> =
            table.values_mut().filter(|r| r.is_due(now)).collect();
        due.sort_by_key(|r| r.created_at);

        let mut claimed = Vec::new();
        for record in due.into_iter().take(limit.max(0) as usize) {
            record.mark_in_progress(owner, now)?;
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn claim_by_id(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxRecord>> {
        let mut state = self.store.state.lock();
        match state.outbox_mut(self.kind).get_mut(&id) {
            Some(record) if record.is_due(now) => {
                record.mark_in_progress(owner, now)?;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        Ok(self.store.outbox_record(self.kind, id))
    }

    async fn save(&self, record: &OutboxRecord, claim: &OutboxClaim) -> Result<()> {
        let mut state = self.store.state.lock();
        state.check_claim(self.kind, claim)?;
        state.outbox_mut(self.kind).insert(claim.outbox_id, record.clone());
        Ok(())
    }

    async fn delete(&self, claim: &OutboxClaim) -> Result<()> {
        let mut state = self.store.state.lock();
        state.check_claim(self.kind, claim)?;
        state.outbox_mut(self.kind).remove(&claim.outbox_id);
        Ok(())
    }

    async fn reclaim_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.store.state.lock();
        let mut reclaimed = 0;
        for record in state.outbox_mut(self.kind).values_mut() {
            let stale = record.status == OutboxStatus::InProgress
                && record.claim_owner.is_some()
                && record.processed_at.is_some_and(|at| at < before);
            if stale {
                record.status = OutboxStatus::Pending;
                record.claim_owner = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

// ---------------------------------------------------------------------------
// 外部服务替身
// ---------------------------------------------------------------------------

/// 固定用户与分群数据，同时实现用户配置与受众查询
#[derive(Default)]
pub struct FixtureUsers {
    users: HashMap<String, UserConfig>,
    segments: HashMap<String, Vec<String>>,
    lookups: AtomicUsize,
}

impl FixtureUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: UserConfig) -> Self {
        self.users.insert(user.user_id.clone(), user);
        self
    }

    pub fn with_segment(mut self, name: &str, user_ids: &[&str]) -> Self {
        self.segments.insert(
            name.to_string(),
            user_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    /// 用户配置查询次数
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserConfigProvider for FixtureUsers {
    async fn get_config(&self, user_id: &str) -> Result<Option<UserConfig>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.get(user_id).cloned())
    }
}

#[async_trait]
impl AudienceProvider for FixtureUsers {
    async fn all_user_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<_> = self.users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn segment_user_ids(&self, segment: &str) -> Result<Vec<String>> {
        Ok(self.segments.get(segment).cloned().unwrap_or_default())
    }
}

/// 固定模板定义
#[derive(Default)]
pub struct FixtureTemplates {
    definitions: HashMap<(String, NotificationType, String), TemplateDefinition>,
    fetches: AtomicUsize,
}

impl FixtureTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: TemplateDefinition) -> Self {
        self.definitions.insert(
            (
                definition.template_id.clone(),
                definition.channel,
                definition.language.clone(),
            ),
            definition,
        );
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateDefinitionProvider for FixtureTemplates {
    async fn get_definition(
        &self,
        template_id: &str,
        channel: NotificationType,
        language: &str,
    ) -> Result<Option<TemplateDefinition>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .definitions
            .get(&(template_id.to_string(), channel, language.to_string()))
            .cloned())
    }
}

/// 可编排的发布器：先按设定次数返回瞬时错误，之后成功
#[derive(Default)]
pub struct ScriptedPublisher {
    transient_failures: AtomicUsize,
    attempts: AtomicUsize,
    published: Mutex<Vec<NotificationMessage>>,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<NotificationMessage> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl DispatchPublisher for ScriptedPublisher {
    async fn publish(&self, message: &NotificationMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(NotificationError::Transient {
                service: "kafka",
                message: "simulated broker outage".to_string(),
            });
        }
        self.published.lock().push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 组装好的测试环境
// ---------------------------------------------------------------------------

pub fn test_template_config() -> TemplateConfig {
    TemplateConfig {
        cache_ttl_secs: 300,
        cache_max_entries: 100,
        default_language: "ko".to_string(),
    }
}

pub fn test_idempotency_config() -> IdempotencyConfig {
    IdempotencyConfig {
        in_flight_wait_ms: 500,
        poll_interval_ms: 5,
        placeholder_ttl_secs: 300,
    }
}

/// 基于内存仓储的完整处理链路，信号断开，只通过轮询推进
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub request_outbox: Arc<InMemoryOutbox>,
    pub message_outbox: Arc<InMemoryOutbox>,
    pub users: Arc<FixtureUsers>,
    pub templates: Arc<FixtureTemplates>,
    pub publisher: Arc<ScriptedPublisher>,
    pub intake: Arc<NotificationIntakeService>,
    pub request_handler: Arc<RequestOutboxHandler>,
    pub message_handler: Arc<MessageOutboxHandler>,
}

impl TestHarness {
    pub fn new(
        users: FixtureUsers,
        templates: FixtureTemplates,
        publisher: ScriptedPublisher,
    ) -> Self {
        let store = InMemoryStore::new();
        let request_outbox = store.outbox(OutboxKind::Request);
        let message_outbox = store.outbox(OutboxKind::Message);
        let users = Arc::new(users);
        let templates = Arc::new(templates);
        let publisher = Arc::new(publisher);

        let guard = Arc::new(IdempotencyGuard::new(
            store.clone(),
            test_idempotency_config(),
        ));
        let intake = Arc::new(NotificationIntakeService::new(
            store.clone(),
            guard,
            OutboxSignal::disconnected(OutboxKind::Request),
        ));

        let resolver = Arc::new(RecipientResolver::new(
            users.clone(),
            users.clone(),
            "ko",
            4,
        ));
        let renderer = Arc::new(TemplateRenderer::new(
            templates.clone(),
            &test_template_config(),
        ));
        let composer = Arc::new(MessageComposer::new(resolver, renderer));

        let request_handler = Arc::new(RequestOutboxHandler::new(
            store.clone(),
            request_outbox.clone(),
            composer,
            OutboxRetryPolicy::new(OutboxKind::Request, &OutboxQueueConfig::request_defaults()),
            OutboxSignal::disconnected(OutboxKind::Message),
        ));
        let message_handler = Arc::new(MessageOutboxHandler::new(
            store.clone(),
            message_outbox.clone(),
            publisher.clone(),
            OutboxRetryPolicy::new(OutboxKind::Message, &OutboxQueueConfig::message_defaults()),
        ));

        Self {
            store,
            request_outbox,
            message_outbox,
            users,
            templates,
            publisher,
            intake,
            request_handler,
            message_handler,
        }
    }

    pub fn request_poller(&self, instance_id: &str) -> OutboxPoller {
        OutboxPoller::new(
            self.request_outbox.clone(),
            self.request_handler.clone(),
            instance_id,
            OutboxQueueConfig::request_defaults(),
        )
    }

    pub fn message_poller(&self, instance_id: &str) -> OutboxPoller {
        OutboxPoller::new(
            self.message_outbox.clone(),
            self.message_handler.clone(),
            instance_id,
            OutboxQueueConfig::message_defaults(),
        )
    }

    pub fn sweeper(&self, stale_after_secs: u64) -> StaleClaimSweeper {
        let repos: Vec<Arc<dyn OutboxRepositoryTrait>> =
            vec![self.request_outbox.clone(), self.message_outbox.clone()];
        StaleClaimSweeper::new(repos, stale_after_secs, 60)
    }
}

// ---------------------------------------------------------------------------
// 测试数据
// ---------------------------------------------------------------------------

pub fn test_user(user_id: &str, language: &str) -> UserConfig {
    UserConfig {
        user_id: user_id.to_string(),
        user_name: Some(format!("name-{user_id}")),
        email: Some(format!("{user_id}@example.com")),
        phone_number: Some("010-0000-0000".to_string()),
        push_token: Some(format!("push-token-{user_id}")),
        language: Some(language.to_string()),
    }
}

/// 指定用户、单一渠道、直接内容的受理命令
pub fn direct_command(user_ids: &[&str], channel: NotificationType) -> NotificationRequestCommand {
    let sender = match channel {
        NotificationType::Sms => SenderInfoDto {
            sender_phone_number: Some("1588-0000".to_string()),
            ..Default::default()
        },
        NotificationType::Email => SenderInfoDto {
            sender_email_address: Some("noreply@example.com".to_string()),
            sender_name: Some("Example".to_string()),
            ..Default::default()
        },
        NotificationType::Push => SenderInfoDto {
            sender_name: Some("Example".to_string()),
            ..Default::default()
        },
    };

    NotificationRequestCommand {
        requester: RequesterDto {
            requester_type: RequesterType::Admin,
            id: "admin-1".to_string(),
        },
        recipients: RecipientsDto {
            user_ids: user_ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        },
        notification_types: vec![channel],
        sender_infos: BTreeMap::from([(channel, sender)]),
        content: Some(ContentDto {
            title: Some("공지".to_string()),
            body: Some("테스트 메시지".to_string()),
            ..Default::default()
        }),
        template: None,
        scheduled_at: None,
        memo: None,
    }
}

pub use notification_shared::test_utils::test_idempotency_key;
