//! 执行引擎端到端测试：内存传输加内存结果存储，
//! 通过`poll_once`确定性驱动消费循环。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use taskflow_client::{SubmitOptions, TaskQueueClient};
use taskflow_core::errors::{TaskError, TaskQueueError};
use taskflow_core::models::{
    RateLimit, RetryPolicy, Signature, TaskDefinition, TaskMessage, TaskState,
};
use taskflow_core::registry::{TaskRegistry, TaskRegistryBuilder};
use taskflow_core::traits::{MessageTransport, ResultStore, TaskContext, TaskHandler};
use taskflow_infrastructure::{InMemoryResultStore, InMemoryTransport};
use taskflow_worker::WorkerService;

fn int_arg(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or(0)
}

/// 求和全部位置参数
struct AddHandler;

#[async_trait::async_trait]
impl TaskHandler for AddHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(json!(sum))
    }
}

/// 第一个参数翻倍
struct DoubleHandler;

#[async_trait::async_trait]
impl TaskHandler for DoubleHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        Ok(json!(int_arg(&args, 0) * 2))
    }
}

/// 第一个参数加一
struct IncrementHandler;

#[async_trait::async_trait]
impl TaskHandler for IncrementHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        Ok(json!(int_arg(&args, 0) + 1))
    }
}

/// 对第一个参数（数组）求和，并记录执行次数
struct SumListHandler {
    executions: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl TaskHandler for SumListHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let list = args
            .first()
            .and_then(Value::as_array)
            .ok_or_else(|| TaskError::permanent("第一个参数必须是数组"))?;
        let sum: i64 = list.iter().filter_map(Value::as_i64).sum();
        Ok(json!(sum))
    }
}

/// 前fail_times次执行失败（临时性错误），之后成功
struct FlakyHandler {
    fail_times: u32,
    executions: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl TaskHandler for FlakyHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let attempt = self.executions.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            Err(TaskError::transient("模拟网络抖动"))
        } else {
            Ok(json!("恢复成功"))
        }
    }
}

/// 永久性失败
struct AlwaysFailHandler;

#[async_trait::async_trait]
impl TaskHandler for AlwaysFailHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        Err(TaskError::permanent("输入数据非法"))
    }
}

/// 长耗时任务，带进度上报
struct SlowHandler {
    duration: Duration,
}

#[async_trait::async_trait]
impl TaskHandler for SlowHandler {
    async fn run(
        &self,
        ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        ctx.report_progress(json!({"current": 0, "total": 2}))
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;
        tokio::time::sleep(self.duration).await;
        ctx.report_progress(json!({"current": 2, "total": 2}))
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;
        Ok(json!("完成"))
    }
}

/// 记录执行次数（撤销测试用）
struct CountingHandler {
    executions: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl TaskHandler for CountingHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(json!(null))
    }
}

/// 记录每次实际执行的真实时刻（限流窗口测试用）
struct StampingHandler {
    stamps: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait::async_trait]
impl TaskHandler for StampingHandler {
    async fn run(
        &self,
        _ctx: TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        self.stamps.lock().unwrap().push(Instant::now());
        Ok(json!(null))
    }
}

struct Harness {
    client: TaskQueueClient,
    worker: WorkerService,
    transport: Arc<InMemoryTransport>,
    store: Arc<InMemoryResultStore>,
}

fn harness(registry: Arc<TaskRegistry>) -> Harness {
    harness_with_concurrency(registry, 8)
}

fn harness_with_concurrency(registry: Arc<TaskRegistry>, max_concurrent: usize) -> Harness {
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryResultStore::new());
    let client = TaskQueueClient::new(transport.clone(), store.clone(), registry.clone());
    let worker = WorkerService::builder(registry, transport.clone(), store.clone())
        .max_concurrent(max_concurrent)
        .build();
    Harness {
        client,
        worker,
        transport,
        store,
    }
}

fn base_registry() -> TaskRegistryBuilder {
    let fast_retry = RetryPolicy {
        max_retries: 2,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        jitter: false,
        retry_on_timeout: false,
    };
    TaskRegistry::builder()
        .register(TaskDefinition::new("tasks.add"), Arc::new(AddHandler))
        .register(TaskDefinition::new("tasks.double"), Arc::new(DoubleHandler))
        .register(
            TaskDefinition::new("tasks.increment").retry_policy(fast_retry),
            Arc::new(IncrementHandler),
        )
}

/// 轮询直到任务进入终态，每轮推进虚拟时钟以触发延迟投递
async fn poll_until_terminal(h: &Harness, task_id: &str, max_rounds: u32) -> TaskState {
    for _ in 0..max_rounds {
        h.worker.poll_once().await.unwrap();
        if let Some(record) = h.store.get(task_id).await.unwrap() {
            if record.state.is_terminal() {
                return record.state;
            }
        }
        tokio::time::advance(Duration::from_millis(200)).await;
    }
    panic!("任务 {task_id} 在{max_rounds}轮内未进入终态");
}

#[tokio::test]
async fn test_single_task_success() {
    let h = harness(base_registry().build());
    let result = h
        .client
        .submit(
            "tasks.add",
            vec![json!(4), json!(4)],
            Map::new(),
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(h.worker.poll_once().await.unwrap(), 1);
    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.value, Some(json!(8)));
}

#[tokio::test(start_paused = true)]
async fn test_chain_propagates_results_in_order() {
    let h = harness(base_registry().build());
    let chain = taskflow_client::chain(vec![
        Signature::new("tasks.double").arg(json!(3)),
        Signature::new("tasks.double"),
        Signature::new("tasks.double"),
    ]);
    let chain_result = h.client.submit_chain(chain).await.unwrap();

    // 每轮只推进一个节点：后继在前驱成功前必须保持PENDING
    h.worker.poll_once().await.unwrap();
    let first = h
        .store
        .get(&chain_result.task_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.state, TaskState::Success);
    assert_eq!(first.value, Some(json!(6)));
    let second = h
        .store
        .get(&chain_result.task_ids[1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.state, TaskState::Pending);

    h.worker.poll_once().await.unwrap();
    h.worker.poll_once().await.unwrap();
    let last = chain_result.last.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(last.state, TaskState::Success);
    // 3 -> 6 -> 12 -> 24
    assert_eq!(last.value, Some(json!(24)));
}

#[tokio::test(start_paused = true)]
async fn test_group_collects_ordered_results_despite_completion_order() {
    let h = harness(base_registry().build());
    // 倒序的countdown使成员按3、2、1、0的顺序完成
    let group = taskflow_client::group(vec![
        Signature::new("tasks.increment")
            .arg(json!(1))
            .countdown(Duration::from_millis(300)),
        Signature::new("tasks.increment")
            .arg(json!(2))
            .countdown(Duration::from_millis(200)),
        Signature::new("tasks.increment")
            .arg(json!(3))
            .countdown(Duration::from_millis(100)),
        Signature::new("tasks.increment").arg(json!(4)),
    ]);
    let group_result = h.client.submit_group(group).await.unwrap();

    for _ in 0..5 {
        h.worker.poll_once().await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
    }

    let values = group_result
        .join_values(Duration::from_secs(1))
        .await
        .unwrap();
    // 结果按提交顺序返回，与完成顺序无关
    assert_eq!(values, vec![json!(2), json!(3), json!(4), json!(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_chord_callback_fires_exactly_once() {
    let executions = Arc::new(AtomicU32::new(0));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.sum_list"),
            Arc::new(SumListHandler {
                executions: executions.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    let chord = taskflow_client::chord(
        vec![
            Signature::new("tasks.increment").arg(json!(1)),
            Signature::new("tasks.increment").arg(json!(2)),
            Signature::new("tasks.increment").arg(json!(3)),
            Signature::new("tasks.increment").arg(json!(4)),
        ],
        Signature::new("tasks.sum_list"),
    );
    let chord_result = h.client.submit_chord(chord).await.unwrap();

    for _ in 0..4 {
        h.worker.poll_once().await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
    }

    let callback = chord_result
        .callback
        .wait(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(callback.state, TaskState::Success);
    // [2, 3, 4, 5]求和
    assert_eq!(callback.value, Some(json!(14)));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retries_until_exhausted() {
    let executions = Arc::new(AtomicU32::new(0));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.flaky").retry_policy(RetryPolicy {
                max_retries: 2,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter: false,
                retry_on_timeout: false,
            }),
            Arc::new(FlakyHandler {
                fail_times: 10, // 永不成功
                executions: executions.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit("tasks.flaky", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();
    let state = poll_until_terminal(&h, result.id(), 20).await;

    assert_eq!(state, TaskState::Failure);
    // 首次执行加2次重试
    assert_eq!(executions.load(Ordering::SeqCst), 3);
    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert!(record.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_flaky_task_recovers_within_budget() {
    let executions = Arc::new(AtomicU32::new(0));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.flaky").retry_policy(RetryPolicy {
                max_retries: 3,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter: false,
                retry_on_timeout: false,
            }),
            Arc::new(FlakyHandler {
                fail_times: 2,
                executions: executions.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit("tasks.flaky", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();
    let state = poll_until_terminal(&h, result.id(), 20).await;

    assert_eq!(state, TaskState::Success);
    assert_eq!(executions.load(Ordering::SeqCst), 3);
    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.value, Some(json!("恢复成功")));
}

#[tokio::test]
async fn test_permanent_failure_skips_retry() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.always_fail"),
            Arc::new(AlwaysFailHandler),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit(
            "tasks.always_fail",
            vec![],
            Map::new(),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    h.worker.poll_once().await.unwrap();

    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.retry_count, 0);
    // 队列中无重试消息
    assert_eq!(h.transport.queue_size("default").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_task_marked_failure_without_retry() {
    let h = harness(base_registry().build());
    // 绕过客户端校验直接发布未注册任务
    let message = TaskMessage::new("tasks.ghost", vec![], "default");
    h.store.put_pending(&message.id).await.unwrap();
    h.transport
        .publish("default", &message, Duration::ZERO)
        .await
        .unwrap();

    h.worker.poll_once().await.unwrap();
    let record = h.store.get(&message.id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.retry_count, 0);
    assert_eq!(h.transport.queue_size("default").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_enforced() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.slow").time_limit(Duration::from_millis(100)),
            Arc::new(SlowHandler {
                duration: Duration::from_secs(60),
            }),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit("tasks.slow", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();
    h.worker.poll_once().await.unwrap();

    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failure);
    assert!(record.error.unwrap().contains("超时"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_metadata_survives_completion() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.slow"),
            Arc::new(SlowHandler {
                duration: Duration::from_millis(100),
            }),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit("tasks.slow", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();
    h.worker.poll_once().await.unwrap();

    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.progress, Some(json!({"current": 2, "total": 2})));
}

#[tokio::test]
async fn test_revoked_task_never_executes() {
    let executions = Arc::new(AtomicU32::new(0));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.counting"),
            Arc::new(CountingHandler {
                executions: executions.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    let result = h
        .client
        .submit(
            "tasks.counting",
            vec![],
            Map::new(),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    assert!(h.client.revoke(result.id()).await.unwrap());

    h.worker.poll_once().await.unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    let record = result.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Revoked);
    // 投递已被确认移除
    assert_eq!(h.transport.queue_size("default").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_chain_aborts_downstream_on_failure() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.always_fail"),
            Arc::new(AlwaysFailHandler),
        )
        .build();
    let h = harness(registry);

    let chain = taskflow_client::chain(vec![
        Signature::new("tasks.always_fail"),
        Signature::new("tasks.double"),
        Signature::new("tasks.double"),
    ]);
    let chain_result = h.client.submit_chain(chain).await.unwrap();
    h.worker.poll_once().await.unwrap();

    let head = h
        .store
        .get(&chain_result.task_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.state, TaskState::Failure);
    // 下游节点不执行，直接标记失败
    for id in &chain_result.task_ids[1..] {
        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Failure);
        assert!(record.error.unwrap().contains("上游"));
    }
    assert_eq!(h.transport.queue_size("default").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_chord_member_failure_suppresses_callback() {
    let executions = Arc::new(AtomicU32::new(0));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.always_fail"),
            Arc::new(AlwaysFailHandler),
        )
        .register(
            TaskDefinition::new("tasks.sum_list"),
            Arc::new(SumListHandler {
                executions: executions.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    let chord = taskflow_client::chord(
        vec![
            Signature::new("tasks.increment").arg(json!(1)),
            Signature::new("tasks.always_fail"),
            Signature::new("tasks.increment").arg(json!(3)),
        ],
        Signature::new("tasks.sum_list"),
    );
    let chord_result = h.client.submit_chord(chord).await.unwrap();

    for _ in 0..4 {
        h.worker.poll_once().await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
    }

    let callback = chord_result
        .callback
        .wait(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(callback.state, TaskState::Failure);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limited_task_requeued_then_dispatched() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.limited").rate_limit(RateLimit {
                ops: 10,
                interval_ms: 1_000,
            }),
            Arc::new(IncrementHandler),
        )
        .build();
    let h = harness(registry);

    let first = h
        .client
        .submit(
            "tasks.limited",
            vec![json!(1)],
            Map::new(),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    let second = h
        .client
        .submit(
            "tasks.limited",
            vec![json!(2)],
            Map::new(),
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    // 同一轮内第二条被限流并延迟重新入队
    h.worker.poll_once().await.unwrap();
    assert_eq!(
        first.get().await.unwrap().unwrap().state,
        TaskState::Success
    );
    assert_eq!(
        second.get().await.unwrap().unwrap().state,
        TaskState::Pending
    );
    assert_eq!(h.transport.queue_size("default").await.unwrap(), 1);

    // 补充周期(100毫秒)之后令牌恢复
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.worker.poll_once().await.unwrap();
    let record = second.get().await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.value, Some(json!(3)));
}

#[tokio::test]
async fn test_rate_cap_bounds_dispatch_windows() {
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.limited").rate_limit(RateLimit {
                ops: 2,
                interval_ms: 1_000,
            }),
            Arc::new(StampingHandler {
                stamps: stamps.clone(),
            }),
        )
        .build();
    let h = harness(registry);

    // 一次性提交10条，远超2次/秒的上限
    let mut results = Vec::new();
    for i in 0..10 {
        let result = h
            .client
            .submit(
                "tasks.limited",
                vec![json!(i)],
                Map::new(),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        results.push(result);
    }

    // 真实时钟下轮询直到全部完成，令牌每500毫秒恢复一个
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        h.worker.poll_once().await.unwrap();
        let mut done = 0;
        for result in &results {
            if let Some(record) = result.get().await.unwrap() {
                if record.state.is_terminal() {
                    done += 1;
                }
            }
        }
        if done == results.len() {
            break;
        }
        assert!(Instant::now() < deadline, "限流任务未在期限内全部完成");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for result in &results {
        let record = result.get().await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Success);
        // 限流重新入队不计入重试
        assert_eq!(record.retry_count, 0);
    }

    let mut stamps = stamps.lock().unwrap().clone();
    stamps.sort();
    assert_eq!(stamps.len(), 10);
    // 任意相隔两位的执行至少跨越一个完整的1秒窗口，
    // 即任何1秒窗口内的分发不超过2次
    for window in stamps.windows(3) {
        assert!(window[2].duration_since(window[0]) >= Duration::from_millis(950));
    }
    assert!(stamps[9].duration_since(stamps[0]) >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_slow_tasks_run_concurrently_within_limit() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.slow"),
            Arc::new(SlowHandler {
                duration: Duration::from_secs(1),
            }),
        )
        .build();
    let h = harness(registry);

    let first = h
        .client
        .submit("tasks.slow", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();
    let second = h
        .client
        .submit("tasks.slow", vec![], Map::new(), SubmitOptions::default())
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(h.worker.poll_once().await.unwrap(), 2);
    // 两个1秒任务并发执行，总耗时约1秒而非2秒
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(
        first.get().await.unwrap().unwrap().state,
        TaskState::Success
    );
    assert_eq!(
        second.get().await.unwrap().unwrap().state,
        TaskState::Success
    );
}

#[tokio::test(start_paused = true)]
async fn test_max_concurrent_one_serializes_execution() {
    let registry = base_registry()
        .register(
            TaskDefinition::new("tasks.slow"),
            Arc::new(SlowHandler {
                duration: Duration::from_secs(1),
            }),
        )
        .build();
    let h = harness_with_concurrency(registry, 1);

    for _ in 0..2 {
        h.client
            .submit("tasks.slow", vec![], Map::new(), SubmitOptions::default())
            .await
            .unwrap();
    }

    let started = tokio::time::Instant::now();
    assert_eq!(h.worker.poll_once().await.unwrap(), 2);
    // 上限为1时第二条投递等待第一条释放许可
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_poll_reports_transport_outage() {
    let h = harness(base_registry().build());
    h.transport.set_available(false);
    let err = h.worker.poll_once().await.unwrap_err();
    assert!(matches!(err, TaskQueueError::TransportUnavailable(_)));

    h.transport.set_available(true);
    assert_eq!(h.worker.poll_once().await.unwrap(), 0);
}
