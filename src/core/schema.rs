diesel::table! {
    users (id) {
        id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        role -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    auth_tokens (token) {
        token -> Varchar,
        user_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    email_otps (id) {
        id -> Uuid,
        email -> Varchar,
        otp_code -> Varchar,
        name -> Varchar,
        password_hash -> Varchar,
        expires_at -> Timestamptz,
        consumed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    categories (id) {
        id -> Int4,
        name -> Varchar,
        is_active -> Bool,
    }
}

diesel::table! {
    priorities (id) {
        id -> Int4,
        name -> Varchar,
        level -> Int4,
    }
}

diesel::table! {
    statuses (id) {
        id -> Int4,
        name -> Varchar,
        is_closed -> Bool,
    }
}

diesel::table! {
    sla_policies (id) {
        id -> Int4,
        priority_id -> Int4,
        response_time_hours -> Int4,
        resolution_time_hours -> Int4,
        is_active -> Bool,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Varchar,
        title -> Varchar,
        description -> Text,
        problem_detail -> Nullable<Text>,
        completion_notes -> Nullable<Text>,
        category_id -> Int4,
        priority_id -> Int4,
        status_id -> Int4,
        requester_id -> Uuid,
        assigned_to -> Nullable<Uuid>,
        assigned_to_pimpinan_id -> Nullable<Uuid>,
        staff_notified_at -> Nullable<Timestamptz>,
        pimpinan_notified_at -> Nullable<Timestamptz>,
        pimpinan_approved_at -> Nullable<Timestamptz>,
        staff_completed_at -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        first_response_at -> Nullable<Timestamptz>,
        sla_response_due -> Nullable<Timestamptz>,
        sla_resolution_due -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_counter (id) {
        id -> Int4,
        value -> Int8,
    }
}

diesel::table! {
    ticket_histories (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Uuid,
        action -> Varchar,
        old_values -> Jsonb,
        new_values -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_comments (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Uuid,
        comment -> Text,
        is_internal -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_attachments (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Uuid,
        file_name -> Varchar,
        file_path -> Varchar,
        file_size -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_ratings (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Uuid,
        rating -> Int4,
        feedback -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    auth_tokens,
    email_otps,
    categories,
    priorities,
    statuses,
    sla_policies,
    tickets,
    ticket_histories,
    ticket_comments,
    ticket_attachments,
    ticket_ratings,
);
