//! Mapping systems onto parallel chunk tasks.
//!
//! A system pairs a view with a job that consumes one chunk-local iterator.
//! Systems sharing a group index run within the same bootstrap task; the
//! bootstrap materializes each system's view, spin-acquires the system's
//! type locks, fans one task out per matched chunk, and releases the locks
//! once every chunk task has finished. Groups run concurrently with each
//! other on a fixed-size thread pool, which the dispatching thread joins
//! for the duration of the tick.
//!
//! When all groups have completed, the world's command buffer is drained —
//! the single point in a tick where structure mutates — and the per-tick
//! bookkeeping (system list, argument arena, group counter) is cleared.

use crate::query::{ChunkIter, View, ViewTuple};
use crate::typeset::TypeQuery;
use crate::world::World;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// A schedulable unit of work: a query plus a chunk-granular job.
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    /// Resolves the query and captures matching chunks. Runs once per tick
    /// before any dispatch.
    fn prepare(&mut self, world: &World);

    /// The resolved access facets the scheduler locks on. Valid after
    /// [`prepare`](Self::prepare).
    fn accesses(&self) -> &TypeQuery;

    /// The number of chunk tasks to dispatch.
    fn chunk_count(&self) -> usize;

    /// Runs the job over one captured chunk. The world reference is for
    /// reads and command-buffer enqueues; structure is frozen mid-tick.
    fn run_chunk(&self, world: &World, chunk: usize);
}

/// A [`Runnable`] built from a view tuple and a job closure.
pub struct System<V: ViewTuple, F> {
    name: String,
    view: View<V>,
    job: F,
}

impl<V, F> System<V, F>
where
    V: ViewTuple,
    F: for<'a> Fn(&'a World, ChunkIter<'a, V>) + Send + Sync,
{
    pub fn new(name: impl Into<String>, job: F) -> Self {
        Self::with_view(name, View::new(), job)
    }

    /// Builds a system over a pre-configured view (carrying `with`/
    /// `exclude`/`filter_shared` predicates).
    pub fn with_view(name: impl Into<String>, view: View<V>, job: F) -> Self {
        Self {
            name: name.into(),
            view,
            job,
        }
    }
}

impl<V, F> Runnable for System<V, F>
where
    V: ViewTuple,
    F: for<'a> Fn(&'a World, ChunkIter<'a, V>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, world: &World) {
        self.view.materialize(world);
    }

    fn accesses(&self) -> &TypeQuery {
        debug_assert!(self.view.is_ready());
        self.view.query()
    }

    fn chunk_count(&self) -> usize {
        self.view.chunk_count()
    }

    fn run_chunk(&self, world: &World, chunk: usize) {
        (self.job)(world, self.view.chunk_iter(chunk));
    }
}

/// Cell granting a bootstrap task exclusive access to the systems of its
/// group while other groups run concurrently.
struct SystemBox(UnsafeCell<Box<dyn Runnable>>);

// Safety: only sound within the constraints of how the scheduler uses it —
// each system belongs to exactly one group, and only that group's bootstrap
// task touches it mutably.
unsafe impl Send for SystemBox {}
unsafe impl Sync for SystemBox {}

impl SystemBox {
    /// # Safety
    /// No `&mut` from `get_mut` may be alive.
    unsafe fn get(&self) -> &dyn Runnable {
        (*self.0.get()).as_ref()
    }

    /// # Safety
    /// The caller must have exclusive access to this system.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self) -> &mut dyn Runnable {
        (*self.0.get()).as_mut()
    }
}

/// Arguments of one chunk task, bump-allocated from the [`TaskArena`].
#[derive(Copy, Clone)]
struct TaskArgs {
    system: usize,
    chunk: usize,
}

/// Fixed-size bump arena for chunk-task arguments, so the dispatch hot path
/// performs no per-task allocation. An atomic bump index hands out slots.
struct TaskArena {
    slots: Box<[UnsafeCell<TaskArgs>]>,
    head: AtomicUsize,
}

// Safety: disjoint slots are handed out atomically; every slot is written
// exactly once between resets.
unsafe impl Sync for TaskArena {}

impl TaskArena {
    fn new(bytes: usize) -> Self {
        let count = bytes / std::mem::size_of::<TaskArgs>();
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, || UnsafeCell::new(TaskArgs { system: 0, chunk: 0 }));
        Self {
            slots: slots.into_boxed_slice(),
            head: AtomicUsize::new(0),
        }
    }

    fn alloc(&self, args: TaskArgs) -> Option<&TaskArgs> {
        let index = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = self.slots.get(index)?;
        // Safety: the bump index makes this slot exclusively ours until the
        // next reset.
        unsafe {
            slot.get().write(args);
            Some(&*slot.get())
        }
    }

    fn reset(&self) {
        self.head.store(0, Ordering::Relaxed);
    }
}

/// Scheduler construction options.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerOptions {
    /// Worker thread count; 0 lets the pool pick the hardware default.
    pub worker_threads: usize,
    /// Size of the task-argument arena.
    pub arena_bytes: usize,
    /// Bypass the pool and run every job inline on the calling thread.
    pub single_threaded: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            arena_bytes: 1 << 20,
            single_threaded: false,
        }
    }
}

/// Dispatches scheduled systems as chunk-granular tasks over a thread pool
/// and drains the world's command buffer at the end of each tick.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    systems: Vec<(usize, SystemBox)>,
    next_group: usize,
    arena: TaskArena,
    /// Run every job inline instead of dispatching to the pool. Semantics
    /// are otherwise identical.
    pub single_threaded: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::default())
    }

    pub fn with_options(options: SchedulerOptions) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_threads)
            .thread_name(|i| format!("comb-worker-{i}"))
            .build()
            .expect("failed to build scheduler thread pool");
        Self {
            pool,
            systems: Vec::new(),
            next_group: 0,
            arena: TaskArena::new(options.arena_bytes),
            single_threaded: options.single_threaded,
        }
    }

    /// Schedules a system into a fresh group, returning the group index.
    pub fn schedule<S: Runnable + 'static>(&mut self, system: S) -> usize {
        let group = self.next_group;
        self.next_group += 1;
        self.schedule_in_group(system, group);
        group
    }

    /// Schedules a system into an existing group. Systems of one group run
    /// from the same bootstrap task; distinct groups run concurrently.
    pub fn schedule_in_group<S: Runnable + 'static>(&mut self, system: S, group: usize) {
        self.next_group = self.next_group.max(group + 1);
        self.systems
            .push((group, SystemBox(UnsafeCell::new(Box::new(system)))));
    }

    /// The number of systems queued for the next tick.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Runs one tick: all scheduled systems, then the command-buffer drain.
    /// The system list, the argument arena, and the group counter are
    /// cleared afterwards.
    pub fn run_systems(&mut self, world: &mut World) {
        if self.single_threaded {
            self.run_inline(world);
        } else {
            self.run_parallel(world);
        }

        world.flush_command_buffer();
        self.systems.clear();
        self.next_group = 0;
        self.arena.reset();
    }

    fn run_inline(&mut self, world: &mut World) {
        for (_, slot) in &self.systems {
            // Safety: &mut self means nothing else touches the systems.
            let system = unsafe { slot.get_mut() };
            system.prepare(world);
            trace!(system = system.name(), chunks = system.chunk_count(), "running inline");
            for chunk in 0..system.chunk_count() {
                system.run_chunk(world, chunk);
            }
        }
    }

    fn run_parallel(&mut self, world: &mut World) {
        // group membership in first-appearance order
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (index, (group, _)) in self.systems.iter().enumerate() {
            match groups.iter_mut().find(|(g, _)| g == group) {
                Some((_, members)) => members.push(index),
                None => groups.push((*group, vec![index])),
            }
        }

        let systems = &self.systems;
        let arena = &self.arena;
        let world_ref: &World = world;

        self.pool.install(|| {
            rayon::scope(|scope| {
                for (group, members) in &groups {
                    let group = *group;
                    scope.spawn(move |_| {
                        run_group(systems, arena, world_ref, group, members);
                    });
                }
            });
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Bootstrap task of one system group: prepares, locks, fans out, waits,
/// releases — for each member system in turn.
fn run_group(
    systems: &[(usize, SystemBox)],
    arena: &TaskArena,
    world: &World,
    group: usize,
    members: &[usize],
) {
    for &index in members {
        // Safety: each system belongs to exactly one group and only this
        // bootstrap task runs that group.
        {
            let system = unsafe { systems[index].1.get_mut() };
            system.prepare(world);
        }
        let system = unsafe { systems[index].1.get() };
        let accesses = system.accesses();

        // all-or-nothing acquisition; a conflicting group is mid-flight, so
        // yield until it releases. Yielding through rayon lets this worker
        // execute other pending tasks instead of burning the core.
        while !world.try_lock_types(&accesses.reads, &accesses.writes) {
            if rayon::yield_now().is_none() {
                std::thread::yield_now();
            }
        }

        let chunks = system.chunk_count();
        trace!(system = system.name(), group, chunks, "dispatching");
        rayon::scope(|tasks| {
            for chunk in 0..chunks {
                match arena.alloc(TaskArgs { system: index, chunk }) {
                    Some(args) => tasks.spawn(move |_| {
                        // Safety: shared access only; preparation is done.
                        let system = unsafe { systems[args.system].1.get() };
                        system.run_chunk(world, args.chunk);
                    }),
                    None => {
                        // arena exhausted: dispatch still proceeds, the
                        // closure just carries its arguments itself
                        warn!(system = system.name(), chunk, "task argument arena exhausted");
                        tasks.spawn(move |_| {
                            let system = unsafe { systems[index].1.get() };
                            system.run_chunk(world, chunk);
                        });
                    }
                }
            }
        });

        world.release_types(&accesses.reads, &accesses.writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Read, Write};

    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Counter(u64);
    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Step(u64);

    fn world_with(count: usize) -> World {
        let mut world = World::new();
        world.register::<Counter>("Counter");
        world.register::<Step>("Step");
        for _ in 0..count {
            world.create_entity((Counter(0), Step(3)));
        }
        world
    }

    type AdvanceView = (Write<Counter>, Read<Step>);

    fn advance(
    ) -> System<AdvanceView, impl for<'a> Fn(&'a World, ChunkIter<'a, AdvanceView>) + Send + Sync>
    {
        System::new("advance", |_: &World, iter: ChunkIter<AdvanceView>| {
            for (_, counter, step) in iter {
                counter.0 += step.0;
            }
        })
    }

    #[test]
    fn tick_runs_every_entity_once() {
        let mut world = world_with(100);
        let mut scheduler = Scheduler::new();
        scheduler.schedule(advance());
        scheduler.run_systems(&mut world);

        let view = world.view::<(Read<Counter>,)>();
        assert!(view.iter().all(|(_, counter)| counter.0 == 3));
        assert_eq!(scheduler.system_count(), 0);
    }

    #[test]
    fn single_threaded_mode_matches() {
        let mut parallel = world_with(257);
        let mut inline = world_with(257);

        let mut scheduler = Scheduler::new();
        scheduler.schedule(advance());
        scheduler.run_systems(&mut parallel);

        let mut scheduler = Scheduler::with_options(SchedulerOptions {
            single_threaded: true,
            ..SchedulerOptions::default()
        });
        scheduler.schedule(advance());
        scheduler.run_systems(&mut inline);

        let a = parallel.view::<(Read<Counter>,)>();
        let b = inline.view::<(Read<Counter>,)>();
        let a: Vec<u64> = a.iter().map(|(_, c)| c.0).collect();
        let b: Vec<u64> = b.iter().map(|(_, c)| c.0).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn commands_drain_at_tick_end() {
        let mut world = world_with(1);
        let mut scheduler = Scheduler::new();
        scheduler.schedule(System::<(Read<Counter>,), _>::new("spawner", |world, iter| {
            for (_, counter) in iter {
                world.commands().create((Counter(counter.0 + 1), Step(1)));
            }
        }));

        assert_eq!(world.len(), 1);
        scheduler.run_systems(&mut world);
        assert_eq!(world.len(), 2);
    }
}
