/// Waiting-queue storage backends and the shared store trait.
pub mod queue_store;
/// Storage abstraction error types shared by all backends.
pub mod storage;
