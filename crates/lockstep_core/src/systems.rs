//! The system contract for the entity/system scheduler.
//!
//! A system is a unit of per-entity behaviour. It declares the attributes
//! an entity must carry (its criteria) and, optionally, attributes that
//! rule an entity out. The scheduler in [`crate::simulation::World`]
//! calls [`System::step_entity`] once per matching entity per tick, in
//! ascending entity id order.

use crate::components::{AttributeSet, Entity, EntityId};
use crate::simulation::EntityStorage;

/// Per-entity behaviour selected by attribute presence.
pub trait System: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Attributes an entity must have for this system to act on it.
    fn criteria(&self) -> AttributeSet;

    /// Attributes that exclude an entity even if the criteria match.
    fn exclusions(&self) -> AttributeSet {
        AttributeSet::EMPTY
    }

    /// Whether this system acts on `entity` right now.
    fn applies_to(&self, entity: &Entity) -> bool {
        let attributes = entity.attributes();
        attributes.contains(self.criteria()) && !attributes.intersects(self.exclusions())
    }

    /// Advance one entity by one tick.
    ///
    /// The whole storage is handed over so a system may add or remove
    /// entities; such changes are visible to later entities and systems in
    /// the same tick.
    fn step_entity(&mut self, id: EntityId, entities: &mut EntityStorage);
}
