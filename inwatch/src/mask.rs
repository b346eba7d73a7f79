//! Flag sets used when creating an inotify instance, adding watches and
//! reading events.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags for creating the inotify instance.
    ///
    /// [`InitFlags::CLOEXEC`] is almost always wanted; exec'd children have no use
    /// for the handle. [`InitFlags::NONBLOCK`] makes little difference for async
    /// retrieval because readiness is always awaited before reading, but the
    /// blocking retrieval path relies on it to honour its timeout.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InitFlags: libc::c_int {
        /// Set close-on-exec on the new descriptor.
        const CLOEXEC = libc::IN_CLOEXEC;

        /// Open the descriptor in non-blocking mode.
        const NONBLOCK = libc::IN_NONBLOCK;
    }
}

impl Default for InitFlags {
    fn default() -> Self {
        Self::CLOEXEC | Self::NONBLOCK
    }
}

bitflags! {
    /// Bit mask used both for adding a watch and for describing a decoded event.
    ///
    /// Unknown bits reported by the kernel are kept so they can pass through to
    /// callers untouched.
    ///
    /// ```
    /// use inwatch::Mask;
    ///
    /// let mask: Mask = "CREATE | DELETE".parse().unwrap();
    /// assert!(mask.contains(Mask::CREATE));
    /// assert_eq!(Mask::MOVE, Mask::MOVED_FROM | Mask::MOVED_TO);
    /// ```
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Mask: u32 {
        /// File was accessed.
        const ACCESS = 0x0000_0001;

        /// File was modified.
        const MODIFY = 0x0000_0002;

        /// Metadata changed (permissions, timestamps, link count, owner).
        const ATTRIB = 0x0000_0004;

        /// File opened for writing was closed.
        const CLOSE_WRITE = 0x0000_0008;

        /// File or directory not opened for writing was closed.
        const CLOSE_NOWRITE = 0x0000_0010;

        /// File or directory was opened.
        const OPEN = 0x0000_0020;

        /// Generated for the directory holding the old name of a renamed entry.
        const MOVED_FROM = 0x0000_0040;

        /// Generated for the directory holding the new name of a renamed entry.
        const MOVED_TO = 0x0000_0080;

        /// Entry created in a watched directory.
        const CREATE = 0x0000_0100;

        /// Entry deleted from a watched directory.
        const DELETE = 0x0000_0200;

        /// Watched object itself was deleted. IGNORED follows.
        const DELETE_SELF = 0x0000_0400;

        /// Watched object itself was moved.
        const MOVE_SELF = 0x0000_0800;

        /// Filesystem holding the watched object was unmounted. IGNORED follows.
        const UNMOUNT = 0x0000_2000;

        /// Kernel event queue overflowed; carries no watch.
        const Q_OVERFLOW = 0x0000_4000;

        /// Watch was removed, explicitly or because its target went away.
        const IGNORED = 0x0000_8000;

        /// Only watch the path if it is a directory.
        const ONLYDIR = 0x0100_0000;

        /// Don't dereference the path if it is a symbolic link.
        const DONT_FOLLOW = 0x0200_0000;

        /// Stop reporting events for children once they are unlinked.
        const EXCL_UNLINK = 0x0400_0000;

        /// Fail with EEXIST if the path is already watched.
        const MASK_CREATE = 0x1000_0000;

        /// OR the mask into an existing watch instead of replacing it.
        const MASK_ADD = 0x2000_0000;

        /// Subject of the event is a directory.
        const ISDIR = 0x4000_0000;

        /// Report one event, then remove the watch.
        const ONESHOT = 0x8000_0000;

        /// Either kind of close.
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();

        /// Both halves of a rename.
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();

        const _ = !0;
    }
}

impl Mask {
    /// Every flag the kernel can report for a watched object.
    pub const ALL_EVENTS: Mask = Mask::ACCESS
        .union(Mask::MODIFY)
        .union(Mask::ATTRIB)
        .union(Mask::CLOSE)
        .union(Mask::OPEN)
        .union(Mask::MOVE)
        .union(Mask::CREATE)
        .union(Mask::DELETE)
        .union(Mask::DELETE_SELF)
        .union(Mask::MOVE_SELF);

    /// Flags the recursive watcher always needs to keep its tree in sync.
    pub const TREE_MAINTENANCE: Mask = Mask::CREATE
        .union(Mask::MOVE)
        .union(Mask::DELETE_SELF)
        .union(Mask::IGNORED);
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl FromStr for Mask {
    type Err = bitflags::parser::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        bitflags::parser::from_str(s)
    }
}
