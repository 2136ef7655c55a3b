// Diesel schema shared by the SQLite and Postgres backends.
// Tablas: episodes, canonical_events, episode_outbox
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    episodes (id) {
        id -> Text,
        patient_id -> Text,
        state -> Text,
        updated_at -> BigInt,
        started_at -> BigInt,
        reason -> Nullable<Text>,
        owner_user_id -> Nullable<Text>,
        closed_at -> Nullable<BigInt>,
        discharge_reason -> Nullable<Text>,
    }
}
diesel::table! {
    canonical_events (id) {
        id -> Text,
        seq -> BigInt,
        event_type -> Text,
        subject_kind -> Text,
        subject_id -> Text,
        actor_user_id -> Nullable<Text>,
        meta -> Text,
        occurred_at -> BigInt,
    }
}
diesel::table! {
    episode_outbox (id) {
        id -> Text,
        seq -> BigInt,
        episode_id -> Text,
        payload -> Text,
        created_at -> BigInt,
        relayed_at -> Nullable<BigInt>,
    }
}
allow_tables_to_appear_in_same_query!(episodes, canonical_events, episode_outbox);
