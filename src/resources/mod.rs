pub mod resourcesets;
