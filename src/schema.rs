// Mirrors migrations/2025-01-01-000000_init/up.sql.

diesel::table! {
    projects (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 120]
        name -> Varchar,
        system_prompt -> Nullable<Text>,
        #[max_length = 200]
        model -> Nullable<Varchar>,
        params -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    chats (id) {
        id -> Uuid,
        user_id -> Uuid,
        project_id -> Uuid,
        #[max_length = 255]
        title -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        chat_id -> Uuid,
        user_id -> Nullable<Uuid>,
        #[max_length = 16]
        role -> Varchar,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    files (id) {
        id -> Uuid,
        project_id -> Uuid,
        user_id -> Uuid,
        #[max_length = 255]
        name -> Varchar,
        #[max_length = 255]
        mime -> Varchar,
        size -> Int8,
        #[max_length = 512]
        storage_locator -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(chats -> projects (project_id));
diesel::joinable!(messages -> chats (chat_id));
diesel::joinable!(files -> projects (project_id));

diesel::allow_tables_to_appear_in_same_query!(projects, chats, messages, files);
