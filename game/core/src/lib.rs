pub mod actors;
pub mod bans;
pub mod checkpoints;
pub mod classes;
pub mod component;
pub mod config;
pub mod console;
pub mod core;
pub mod dialogs;
pub mod gangzones;
pub mod legacyconfig;
pub mod models;
pub mod objects;
pub mod pickups;
pub mod player;
pub mod rpcs;
pub mod stream;
pub mod textlabels;
pub mod vehicles;
