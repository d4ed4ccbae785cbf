//! Scripted firmware driving the service tables

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use copro_abi::*;
use copro_arena::{AllocPolicy, Arena, BackingRegion, PAGE_SIZE};
use copro_sched::{MisusePolicy, SchedulerConfig, TaskFn, TaskScheduler};

fn setup() -> (ServiceTable, ServiceTable) {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Arc::new(Arena::new(AllocPolicy::Bump));
    let mut config = SchedulerConfig::default();
    config.affinity = false;
    config.misuse = MisusePolicy::Reject;
    let scheduler = Arc::new(TaskScheduler::new(config).unwrap());
    scheduler.start().unwrap();

    let host = Arc::new(Host::new(HostConfig::default(), arena.clone(), scheduler).unwrap());
    for (index, pool) in PoolId::ALL.into_iter().enumerate() {
        let base = 0x1000_0000 + index * 0x10_0000;
        let handle = arena
            .init_pool(pool.name(), BackingRegion::new(base, 0xC000_0000 + base as u64, 0x10_0000), PAGE_SIZE)
            .unwrap();
        host.bind_pool(pool, handle);
    }

    (build_primary_table(host.clone()), build_auxiliary_table(host))
}

/// Empty and out-of-range slots are errors, never panics
#[test]
fn test_empty_slots_report_null_entry() {
    let (primary_table, auxiliary_table) = setup();

    for index in [1, 2, 44, 45, 70, 98, 100, 5000] {
        let err = primary_table.invoke(index, Call::Void).unwrap_err();
        assert!(matches!(err, AbiError::NullEntry { .. }));
        assert_eq!(err.errno(), -libc::ENOSYS);
    }

    assert!(matches!(
        auxiliary_table.invoke(auxiliary::ALLOC, Call::Size(64)),
        Err(AbiError::NullEntry { .. })
    ));
}

/// Wrong argument shape is rejected before the service runs
#[test]
fn test_bad_arguments_rejected() {
    let (primary_table, _) = setup();

    let err = primary_table.invoke(primary::SEMA_UP, Call::Size(1)).unwrap_err();
    assert!(matches!(err, AbiError::BadArguments { service: "sema_up", .. }));
    assert_eq!(err.errno(), -libc::EINVAL);
}

/// Null and stale handles are rejected for every handle-taking service
#[test]
fn test_null_and_stale_handles() {
    let (primary_table, _) = setup();

    for index in [primary::SEMA_UP, primary::MUTEX_LOCK, primary::SPIN_LOCK, primary::TIMER_ENABLE] {
        let err = primary_table.invoke(index, Call::Handle(Handle::NULL)).unwrap_err();
        assert_eq!(err.errno(), -libc::EBADF);
    }

    let sema = primary_table
        .invoke(primary::SEMA_INIT, Call::Count(1))
        .unwrap()
        .as_handle()
        .unwrap();
    primary_table.invoke(primary::SEMA_FINISH, Call::Handle(sema)).unwrap();
    assert!(matches!(
        primary_table.invoke(primary::SEMA_DOWN, Call::Handle(sema)),
        Err(AbiError::BadHandle(_))
    ));
}

/// A handle with an empty slot field is garbage, not a panic
#[test]
fn test_garbage_handle_rejected() {
    let (primary_table, _) = setup();
    let garbage = Handle(0x0001_0000);

    for index in [primary::SEMA_UP, primary::MUTEX_LOCK, primary::SPIN_LOCK, primary::TIMER_ENABLE] {
        let err = primary_table.invoke(index, Call::Handle(garbage)).unwrap_err();
        assert!(matches!(err, AbiError::BadHandle(0x0001_0000)));
        assert_eq!(err.errno(), -libc::EBADF);
    }
}

/// Semaphore, mutex and spin lock lifecycles through the primary table
#[test]
fn test_lock_primitives() {
    let (t, _) = setup();

    let sema = t.invoke(primary::SEMA_INIT, Call::Count(1)).unwrap().as_handle().unwrap();
    t.invoke(primary::SEMA_DOWN, Call::Handle(sema)).unwrap();
    t.invoke(primary::SEMA_UP, Call::Handle(sema)).unwrap();
    t.invoke(primary::SEMA_FINISH, Call::Handle(sema)).unwrap();

    let mutex = t.invoke(primary::MUTEX_INIT, Call::Void).unwrap().as_handle().unwrap();
    t.invoke(primary::MUTEX_LOCK, Call::Handle(mutex)).unwrap();
    assert_eq!(
        t.invoke(primary::MUTEX_TRYLOCK, Call::Handle(mutex)).unwrap().as_bool(),
        Some(false)
    );
    t.invoke(primary::MUTEX_UNLOCK, Call::Handle(mutex)).unwrap();
    assert!(t.invoke(primary::MUTEX_UNLOCK, Call::Handle(mutex)).is_err());
    t.invoke(primary::MUTEX_FINISH, Call::Handle(mutex)).unwrap();

    let spin = t.invoke(primary::SPIN_INIT, Call::Void).unwrap().as_handle().unwrap();
    let flags = t
        .invoke(primary::SPIN_LOCK_IRQSAVE, Call::Handle(spin))
        .unwrap()
        .as_flags()
        .unwrap();
    assert!(irqs_masked());
    t.invoke(primary::SPIN_UNLOCK_IRQRESTORE, Call::HandleFlags(spin, flags))
        .unwrap();
    assert!(!irqs_masked());

    let flags = t.invoke(primary::SVC_LOCK_SAVE, Call::Void).unwrap().as_flags().unwrap();
    t.invoke(primary::SVC_UNLOCK_RESTORE, Call::Flags(flags)).unwrap();
    t.invoke(primary::SPIN_FINISH, Call::Handle(spin)).unwrap();
}

/// Primary add_task accepts 11..=15 and refuses anything else without side effects
#[test]
fn test_add_task_priority_ranges() {
    let (primary_table, auxiliary_table) = setup();
    let runs = Arc::new(AtomicUsize::new(0));
    let task: TaskFn = {
        let runs = runs.clone();
        Arc::new(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };

    let queued = primary_table
        .invoke(primary::ADD_TASK, Call::Task { priority: 11, func: task.clone(), arg: 0 })
        .unwrap();
    assert_eq!(queued, Reply::Bool(true));

    let refused = primary_table
        .invoke(primary::ADD_TASK, Call::Task { priority: 16, func: task.clone(), arg: 0 })
        .unwrap();
    assert_eq!(refused, Reply::Bool(false));

    let aux = auxiliary_table
        .invoke(auxiliary::ADD_TASK, Call::Task { priority: 16, func: task.clone(), arg: 0 })
        .unwrap();
    assert_eq!(aux, Reply::Bool(true));

    let aux_refused = auxiliary_table
        .invoke(auxiliary::ADD_TASK, Call::Task { priority: 12, func: task, arg: 0 })
        .unwrap();
    assert_eq!(aux_refused, Reply::Bool(false));

    primary_table.invoke(primary::FLUSH_TASK_HANDLER, Call::Priority(11)).unwrap();
    primary_table.host().scheduler().flush_all().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A registered interrupt handler observes in_irq() through the table
#[test]
fn test_interrupt_handler_sees_irq_context() {
    let (t, _) = setup();
    let observed = Arc::new(AtomicBool::new(false));

    let handler: IrqHandler = {
        let t = t.clone();
        let observed = observed.clone();
        Arc::new(move |_, _| {
            let in_irq = t.invoke(primary::IN_IRQ, Call::Void).unwrap();
            observed.store(in_irq == Reply::Bool(true), Ordering::SeqCst);
        })
    };

    t.invoke(
        primary::REGISTER_IRQ,
        Call::RegisterIrq(HwipRegistration {
            chain: HwipChain::Isp1 as u32,
            id: 10,
            priority: 0,
            ctx: 0,
            handler,
        }),
    )
    .unwrap();

    assert_eq!(t.invoke(primary::IN_IRQ, Call::Void).unwrap(), Reply::Bool(false));
    assert!(t.host().hwip_irqs().dispatch(HwipChain::Isp1, 10).unwrap());
    assert!(observed.load(Ordering::SeqCst));

    let err = t
        .invoke(primary::UNREGISTER_IRQ, Call::UnregisterIrq { id: 30, chain: 3 })
        .unwrap_err();
    assert_eq!(err.errno(), -libc::EINVAL);
    t.invoke(primary::ENABLE_IRQ, Call::IrqId(10)).unwrap();
}

/// Pool services route to the right pool and translate both ways
#[test]
fn test_pool_services() {
    let (t, _) = setup();

    let kva = t.invoke(primary::MEDRC_ALLOC, Call::Size(0x1800)).unwrap().as_kva().unwrap();
    let dva = t.invoke(primary::MEDRC_DVA, Call::Kva(kva)).unwrap().as_dva().unwrap();
    assert_eq!(t.invoke(primary::MEDRC_KVA, Call::Dva(dva)).unwrap().as_kva(), Some(kva));

    // The same address is foreign to another pool
    let err = t.invoke(primary::TNR_DVA, Call::Kva(kva)).unwrap_err();
    assert!(matches!(err, AbiError::Arena(_)));

    t.invoke(primary::MEDRC_INV, Call::Range { kva, size: 0x1800 }).unwrap();
    t.invoke(primary::MEDRC_FREE, Call::Kva(kva)).unwrap();

    let oom = t.invoke(primary::TAAISP_ALLOC, Call::Size(0x20_0000)).unwrap_err();
    assert_eq!(oom.errno(), -libc::ENOMEM);
}

/// Timers created through the auxiliary table fire once enabled
#[test]
fn test_auxiliary_timer() {
    let (_, t) = setup();
    let fired = Arc::new(AtomicUsize::new(0));
    let func: TimerFn = {
        let fired = fired.clone();
        Arc::new(move |data| {
            fired.store(data, Ordering::SeqCst);
        })
    };

    let timer = t
        .invoke(auxiliary::TIMER_CREATE, Call::TimerCreate { expires_ms: 5, func, data: 42 })
        .unwrap()
        .as_handle()
        .unwrap();
    t.invoke(auxiliary::TIMER_ENABLE, Call::Handle(timer)).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 42);
    t.invoke(auxiliary::TIMER_DELETE, Call::Handle(timer)).unwrap();
}

/// Logging, events, assert latch and version query
#[test]
fn test_misc_services() {
    let (p, a) = setup();

    p.invoke(primary::LOG_WRITE, Call::Text("frame done\n".into())).unwrap();
    a.invoke(auxiliary::LOG_CONSOLE, Call::Text("aux up".into())).unwrap();
    assert!(p.host().log().dump().contains("frame done"));

    let long = "e".repeat(400);
    assert_eq!(
        p.invoke(primary::EVENT_WRITE, Call::Text(long)).unwrap_err().errno(),
        -libc::ENOMEM
    );

    p.host().set_binary_version(BinaryKind::Library, "[DDK][2019]v7".into());
    assert_eq!(
        a.invoke(
            auxiliary::GET_BINARY_VERSION,
            Call::BinaryVersion { kind: BinaryKind::Library, hint: 0 }
        )
        .unwrap(),
        Reply::Text(Some("v7".into()))
    );

    let usec = a.invoke(auxiliary::GET_USEC, Call::Void).unwrap().as_word().unwrap();
    a.invoke(auxiliary::UDELAY, Call::Delay(50)).unwrap();
    assert!(a.invoke(auxiliary::GET_USEC, Call::Void).unwrap().as_word().unwrap() >= usec + 50);

    a.invoke(auxiliary::ASSERT, Call::Void).unwrap();
    assert!(p.host().fatal().is_set());
}
