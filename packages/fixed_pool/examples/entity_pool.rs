//! Using `TypedPool` as the backing store of a tiny entity system:
//!
//! * Spawning entities until the pool is exhausted.
//! * Despawning some of them and observing slot reuse.
//! * Inspecting occupancy via stats.

use std::ptr::NonNull;

use fixed_pool::TypedPool;
use new_zealand::nz;

#[derive(Debug)]
struct Entity {
    id: u32,
    health: i32,
}

fn main() {
    let mut pool = TypedPool::<Entity>::new(nz!(8));

    // The pool does not track live objects, so we keep our own list.
    let mut entities: Vec<NonNull<Entity>> = Vec::new();

    for id in 0.. {
        let Some(entity) = pool.new_object(Entity { id, health: 100 }) else {
            println!("Pool exhausted after spawning {id} entities");
            break;
        };

        entities.push(entity);
    }

    let stats = pool.stats();
    println!(
        "Live entities: {}, blocks: {}",
        stats.allocation_count(),
        stats.block_count()
    );

    // Damage every entity. We hold the only pointers, so exclusive access is fine.
    for entity in &mut entities {
        // SAFETY: The entity is live and nothing else references it.
        let entity = unsafe { entity.as_mut() };
        entity.health -= 10 * i32::try_from(entity.id).expect("ids are small");
    }

    // Despawn the entities that died.
    entities.retain(|entity| {
        // SAFETY: The entity is live and nothing else references it.
        let alive = unsafe { entity.as_ref() }.health > 30;

        if !alive {
            // SAFETY: The pointer came from this pool and is dropped from our list right after.
            unsafe { pool.delete_object(*entity) };
        }

        alive
    });

    println!("Live entities after despawn: {}", pool.len());

    // The most recently freed slot is handed out first.
    let newcomer = pool
        .new_object(Entity { id: 99, health: 100 })
        .expect("we just freed some slots");
    entities.push(newcomer);

    for entity in &entities {
        // SAFETY: The entity is live and nothing else references it.
        println!("{:?}", unsafe { entity.as_ref() });
    }

    for entity in entities {
        // SAFETY: The pointer came from this pool and is not used afterwards.
        unsafe { pool.delete_object(entity) };
    }

    println!("Pool empty again: {}", pool.is_empty());
}
