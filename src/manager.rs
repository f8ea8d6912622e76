//! The pool's view of the resources it holds: how to make one and how to close one.

use std::error::Error;
use std::marker::PhantomData;

/// Creates and closes the resources a pool hands out.
///
/// `create` is only ever called from inside a checkout while the pool's queue
/// lock is held, so creation is serialized per pool. Resources only need to be
/// `Send`: the pool hands each one to a single owner at a time.
pub trait ManageResource: Send + Sync + 'static {
    type Resource: Send + 'static;
    type Error: Error + Send + Sync + 'static;

    /// Produce one new resource.
    fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Disconnect a resource the pool is discarding.
    fn close(&self, _resource: &Self::Resource) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A [`ManageResource`] built from a pair of closures.
///
/// # Examples
///
/// ```
/// use respool::FnManager;
/// use std::io;
///
/// let manager = FnManager::new(
///     || Ok::<_, io::Error>(String::from("conn")),
///     |_conn: &String| Ok(()),
/// );
/// # let _ = manager;
/// ```
pub struct FnManager<R, E, C, D> {
    create: C,
    close: D,
    _marker: PhantomData<fn() -> (R, E)>,
}

impl<R, E, C, D> FnManager<R, E, C, D>
where
    C: Fn() -> Result<R, E>,
    D: Fn(&R) -> Result<(), E>,
{
    pub fn new(create: C, close: D) -> Self {
        Self {
            create,
            close,
            _marker: PhantomData,
        }
    }
}

impl<R, E, C, D> ManageResource for FnManager<R, E, C, D>
where
    R: Send + 'static,
    E: Error + Send + Sync + 'static,
    C: Fn() -> Result<R, E> + Send + Sync + 'static,
    D: Fn(&R) -> Result<(), E> + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    fn create(&self) -> Result<R, E> {
        (self.create)()
    }

    fn close(&self, resource: &R) -> Result<(), E> {
        (self.close)(resource)
    }
}
