use std::sync::atomic::{AtomicBool, Ordering};

/// Per-link contact flags fed by the physics contact stream.
///
/// The writer side calls [`CollisionMonitor::set_contact`] on contact
/// begin/end; the jog guard only reads the aggregate. Flags are atomics so
/// the callback stream may live on another thread.
pub struct CollisionMonitor {
    links: Vec<String>,
    flags: Vec<AtomicBool>,
}

impl CollisionMonitor {
    pub fn new(links: Vec<String>) -> CollisionMonitor {
        let flags = links.iter().map(|_| AtomicBool::new(false)).collect();
        CollisionMonitor { links, flags }
    }

    pub fn link_names(&self) -> &[String] {
        &self.links
    }

    /// Record contact state for a link. Unknown links are logged and dropped.
    pub fn set_contact(&self, link: &str, touching: bool) {
        match self.links.iter().position(|name| name == link) {
            Some(index) => self.flags[index].store(touching, Ordering::Release),
            None => tracing::warn!("Contact report for unknown link {:?} dropped", link),
        }
    }

    pub fn is_colliding(&self, link: &str) -> bool {
        self.links
            .iter()
            .position(|name| name == link)
            .map(|index| self.flags[index].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// True when any link reports contact.
    pub fn any_collision(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| flag.load(Ordering::Acquire))
    }

    pub fn clear_all(&self) {
        for flag in &self.flags {
            flag.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> CollisionMonitor {
        CollisionMonitor::new(vec!["shoulder".to_owned(), "wrist".to_owned()])
    }

    #[test]
    fn contact_begin_and_end() {
        let monitor = monitor();
        assert!(!monitor.any_collision());
        monitor.set_contact("wrist", true);
        assert!(monitor.any_collision());
        assert!(monitor.is_colliding("wrist"));
        assert!(!monitor.is_colliding("shoulder"));
        monitor.set_contact("wrist", false);
        assert!(!monitor.any_collision());
    }

    #[test]
    fn unknown_link_is_dropped() {
        let monitor = monitor();
        monitor.set_contact("gripper", true);
        assert!(!monitor.any_collision());
    }

    #[test]
    fn clear_all_resets_flags() {
        let monitor = monitor();
        monitor.set_contact("shoulder", true);
        monitor.set_contact("wrist", true);
        monitor.clear_all();
        assert!(!monitor.any_collision());
    }
}
