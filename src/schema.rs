// Mirrors the DDL applied by `Database::init_schema`.

diesel::table! {
    tasks (id) {
        id -> Text,
        title -> Text,
        description -> Text,
        priority -> Text,
        mode -> Text,
        auto_mode -> Bool,
        assigned_to -> Nullable<Text>,
        additional_tool_names -> Text,
        status -> Text,
        detailed_status -> Text,
        result_json -> Nullable<Text>,
        error_message -> Nullable<Text>,
        continuation -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    task_interactions (task_id, id) {
        task_id -> Text,
        id -> BigInt,
        interaction_type -> Text,
        content -> Text,
        metadata -> Text,
        requires_response -> Bool,
        response -> Nullable<Text>,
        created_at -> Text,
        responded_at -> Nullable<Text>,
    }
}

diesel::table! {
    tool_approval_requests (id) {
        id -> Text,
        agent_id -> Nullable<Text>,
        task_id -> Nullable<Text>,
        requested_tools -> Text,
        reason -> Text,
        status -> Text,
        requested_at -> Text,
        responded_at -> Nullable<Text>,
        response_note -> Nullable<Text>,
    }
}

diesel::table! {
    execution_logs (task_id, id) {
        task_id -> Text,
        id -> BigInt,
        agent_id -> Nullable<Text>,
        action -> Text,
        status -> Text,
        output_json -> Nullable<Text>,
        error_message -> Nullable<Text>,
        execution_time -> Nullable<Double>,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    execution_logs,
    task_interactions,
    tasks,
    tool_approval_requests,
);
