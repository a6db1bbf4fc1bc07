use crate::assembly::{Assembly, GlobalMatrix, GlobalTargets, GlobalVector};
use crate::config::AssemblyOptions;
use crate::element::Elem;
use crate::loops::{AuxLoop, ElementLoop, MortarLoop};
use crate::system::System;
use eyre::WrapErr;
use itertools::Itertools;
use log::debug;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Chunks per worker thread. Several chunks per thread keep the workers busy when element costs
/// differ.
const CHUNKS_PER_THREAD: usize = 4;

/// Runs loops in parallel over disjoint contiguous ranges of elements or segments.
///
/// Every worker thread owns one [`Assembly`], created on first use and kept for later passes.
/// Each range is drained into the global targets before its worker picks up the next one, so the
/// global structures are only touched under their locks. Sums may differ in the last bits between
/// runs because the order of the additions depends on the thread schedule.
#[derive(Debug)]
pub struct ThreadedAssembler {
    system: Arc<System>,
    options: AssemblyOptions,
    assemblies: ThreadLocal<RefCell<Assembly>>,
    pool: Option<ThreadPool>,
}

impl ThreadedAssembler {
    /// Creates the assembler. A dedicated thread pool is built when
    /// [`AssemblyOptions::num_threads`] is set; otherwise the global rayon pool is used.
    pub fn new(system: Arc<System>, options: AssemblyOptions) -> eyre::Result<Self> {
        let pool = options
            .num_threads
            .map(|num_threads| ThreadPoolBuilder::new().num_threads(num_threads).build())
            .transpose()
            .wrap_err("failed to build the assembly thread pool")?;
        Ok(Self {
            system,
            options,
            assemblies: ThreadLocal::new(),
            pool,
        })
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    fn num_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, ThreadPool::current_num_threads)
    }

    fn chunk_size(&self, n: usize) -> usize {
        let chunks = CHUNKS_PER_THREAD * self.num_threads();
        ((n + chunks - 1) / chunks).max(1)
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn with_assembly<R>(&self, op: impl FnOnce(&mut Assembly) -> eyre::Result<R>) -> eyre::Result<R> {
        let assembly = self.assemblies.get_or_try(|| {
            Assembly::new(Arc::clone(&self.system), self.options.clone()).map(RefCell::new)
        })?;
        let mut assembly = assembly.borrow_mut();
        op(&mut assembly)
    }

    fn par_chunked<T: Sync>(
        &self,
        items: &[T],
        op: impl Fn(&mut Assembly, &[T]) -> eyre::Result<()> + Sync + Send,
    ) -> eyre::Result<()> {
        let chunk_size = self.chunk_size(items.len());
        self.install(|| {
            items
                .par_chunks(chunk_size)
                .try_for_each(|chunk| self.with_assembly(|assembly| op(assembly, chunk)))
        })
    }

    /// Runs `element_loop` over all volume elements of its mesh.
    pub fn run_element_loop<V, M>(&self, element_loop: &ElementLoop, targets: &GlobalTargets<V, M>) -> eyre::Result<()>
    where
        V: GlobalVector,
        M: GlobalMatrix,
    {
        let elems: Vec<&Elem> = element_loop.mesh().volume_elems().collect();
        debug!("Running element loop over {} elements", elems.len());
        self.par_chunked(&elems, |assembly, chunk| {
            element_loop.run(assembly, chunk.iter().copied(), targets)
        })
    }

    pub fn run_mortar_loop<V, M>(&self, mortar_loop: &MortarLoop, targets: &GlobalTargets<V, M>) -> eyre::Result<()>
    where
        V: GlobalVector,
        M: GlobalMatrix,
    {
        let segments = mortar_loop.segments().segments();
        debug!("Running mortar loop over {} segments", segments.len());
        self.par_chunked(segments, |assembly, chunk| mortar_loop.run(assembly, chunk, targets))
    }

    pub fn run_aux_loop<V: GlobalVector>(&self, aux_loop: &AuxLoop, aux: &Mutex<V>) -> eyre::Result<()> {
        let elems = aux_loop.mesh().volume_elems().collect_vec();
        self.par_chunked(&elems, |assembly, chunk| aux_loop.run(assembly, chunk.iter().copied(), aux))
    }

    /// Logs the statistics of every worker's assembly.
    pub fn log_stats(&mut self) {
        for assembly in self.assemblies.iter_mut() {
            assembly.get_mut().log_stats();
        }
    }

    /// Number of worker assemblies created so far.
    pub fn n_assemblies(&mut self) -> usize {
        self.assemblies.iter_mut().count()
    }
}
