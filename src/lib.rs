//! Near-real-time operator view of remote conversations over plain polling.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(warnings)] // Tous les warnings sont traités comme des erreurs
#![deny(unsafe_code)] // Le code unsafe est interdit
#![deny(missing_docs)] // Toute fonction, struct, enum ou module public doit être documenté
#![deny(dead_code)] // Le code inutilisé est interdit
#![deny(non_camel_case_types)]
// Les types doivent suivre la convention CamelCase (exception explicite possible au besoin)

// Options supplémentaires pour ne rien laisser passer
#![deny(unused_imports)] // Les imports inutilisés sont interdits
#![deny(unused_variables)] // Les variables inutilisés sont interdits
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![deny(non_snake_case)] // Les noms de variables et fonctions doivent être en snake_case
#![deny(non_upper_case_globals)] // Les constantes et globals doivent être en MAJUSCULE
#![deny(nonstandard_style)] // Empêche tout style de code non standard
#![forbid(unsafe_op_in_unsafe_fn)]
// Interdit l'utilisation d'unsafe même dans une fonction unsafe

// Clippy pour stricte discipline
#![deny(clippy::all)] // Active toutes les lints Clippy standard
#![deny(clippy::pedantic)] // Active les lints très strictes de Clippy
#![deny(clippy::nursery)] // Active les lints expérimentales
#![deny(clippy::unwrap_used)] // Interdit unwrap()
#![deny(clippy::expect_used)] // Interdit expect()
#![deny(clippy::panic)] // Interdit panic!()
#![deny(clippy::print_stdout)] // Interdit println!() en production
#![deny(clippy::todo)] // Interdit les TODO dans le code
#![deny(clippy::unimplemented)] // Interdit les fonctions non implémentées
#![deny(clippy::missing_const_for_fn)] // Force const lorsque possible
#![deny(clippy::unwrap_in_result)] // Interdit unwrap() sur Result
#![deny(clippy::module_inception)] // Interdit un module ayant le même nom que le crate
#![deny(clippy::redundant_clone)] // Interdit les clones inutiles
#![deny(clippy::shadow_unrelated)] // Interdit le shadowing de variables non liées
#![deny(clippy::too_many_arguments)] // Limite le nombre d’arguments des fonctions
#![deny(clippy::cognitive_complexity)] // Limite la complexité cognitive des fonctions
// Les tests gardent unwrap() et panic!() pour des assertions lisibles
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

// Lints pour sécurité et robustesse
#![deny(overflowing_literals)] // Interdit les littéraux qui débordent

/// Operator engagement signal (input recency, tab visibility).
pub mod activity;
/// Conversation list cache, reconciliation and derived view.
pub mod chat_list;
/// Tracker configuration.
pub mod config;
/// Error types.
pub mod error;
/// Local durable cache slots.
pub mod local_cache;
/// Selected-conversation message stream with optimistic echo.
pub mod messages;
/// Boundary normalization of remote payloads.
pub mod payload;
/// Remote collaborator contracts and the HTTP client.
pub mod remote;
/// Activity-aware polling loops.
pub mod scheduler;
/// Request sequence numbers.
pub mod sequence;
/// HTTP chat-status service.
#[allow(
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::unused_async
)]
pub mod server;
/// Per-session context owning loops and caches.
pub mod session;
/// Entry helpers for the binaries.
pub mod start_chat_tracker;
/// Per-conversation toggle flags.
pub mod toggles;
/// Core data types.
pub mod types;

pub use chat_list::ChatList;
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use messages::MessageStream;
pub use remote::{ChatRemote, HttpChatRemote};
pub use scheduler::{PollCadence, PollLoop, PollScheduler};
pub use session::SyncSession;
pub use toggles::ToggleStore;
pub use types::{Conversation, DeliveryState, Direction, DisplayMessage, Message, SyncEvent, Toggle};
