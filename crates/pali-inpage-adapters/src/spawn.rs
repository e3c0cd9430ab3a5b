use pali_inpage_core::{BoxFuture, Spawner};

/// Runs tasks on the ambient tokio runtime. Must be used from within one.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(not(target_arch = "wasm32"))]
impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Runs tasks on the page's microtask queue.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSpawner;

#[cfg(target_arch = "wasm32")]
impl Spawner for LocalSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
