use std::fmt::Debug;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{BuildTargetPlatform, Platform};

/// Enum to hide the different platform implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(&'static BuildTargetPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

impl PlatformFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetPlatform)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Platform for PlatformFacade {
    fn get_proc_self_status_contents(&self) -> Option<String> {
        match self {
            Self::Target(platform) => platform.get_proc_self_status_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_proc_self_status_contents(),
        }
    }

    fn release_free_memory(&self) {
        match self {
            Self::Target(platform) => platform.release_free_memory(),
            #[cfg(test)]
            Self::Mock(mock) => mock.release_free_memory(),
        }
    }

    fn limit_allocator_arenas(&self) {
        match self {
            Self::Target(platform) => platform.limit_allocator_arenas(),
            #[cfg(test)]
            Self::Mock(mock) => mock.limit_allocator_arenas(),
        }
    }
}

impl Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
