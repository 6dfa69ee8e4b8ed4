//! Source queries over the `content` schema
//!
//! Every inner query filters on `$1` (`since`, nullable) and exposes `id` and
//! `modified`. [`declare_cursor`] wraps it so each row comes back as the typed
//! cursor column plus the whole row as `jsonb`.

use crate::stream::SourceQuery;

pub const CURSOR_NAME: &str = "sync_cursor";

const WORKS: &str = r#"
SELECT
    fw.id,
    fw.title,
    fw.description,
    fw.rating,
    fw.permissions,
    fw.modified,
    COALESCE(
        array_agg(DISTINCT g.name) FILTER (WHERE g.id IS NOT NULL),
        '{}'
    ) AS genres,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'actor'),
        '[]'
    ) AS actors,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'writer'),
        '[]'
    ) AS writers,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'director'),
        '[]'
    ) AS directors
FROM content.film_work fw
LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
LEFT JOIN content.person p ON p.id = pfw.person_id
LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
LEFT JOIN content.genre g ON g.id = gfw.genre_id
WHERE ($1::timestamptz IS NULL OR fw.modified > $1)
GROUP BY fw.id
"#;

// Cursor is the newest changed category; the list is rebuilt from all links.
const WORK_CATEGORIES: &str = r#"
SELECT
    fw.id,
    changed.modified,
    array_agg(DISTINCT g.name) AS genres
FROM (
    SELECT gfw.film_work_id AS id, max(g.modified) AS modified
    FROM content.genre g
    JOIN content.genre_film_work gfw ON gfw.genre_id = g.id
    WHERE ($1::timestamptz IS NULL OR g.modified > $1)
    GROUP BY gfw.film_work_id
) changed
JOIN content.film_work fw ON fw.id = changed.id
JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
JOIN content.genre g ON g.id = gfw.genre_id
GROUP BY fw.id, changed.modified
"#;

const WORK_CONTRIBUTORS: &str = r#"
SELECT
    fw.id,
    changed.modified,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE pfw.role = 'actor'),
        '[]'
    ) AS actors,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE pfw.role = 'writer'),
        '[]'
    ) AS writers,
    COALESCE(
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name))
            FILTER (WHERE pfw.role = 'director'),
        '[]'
    ) AS directors
FROM (
    SELECT pfw.film_work_id AS id, max(p.modified) AS modified
    FROM content.person p
    JOIN content.person_film_work pfw ON pfw.person_id = p.id
    WHERE ($1::timestamptz IS NULL OR p.modified > $1)
    GROUP BY pfw.film_work_id
) changed
JOIN content.film_work fw ON fw.id = changed.id
JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
JOIN content.person p ON p.id = pfw.person_id
GROUP BY fw.id, changed.modified
"#;

const CATEGORIES: &str = r#"
SELECT
    g.id,
    g.name,
    g.modified
FROM content.genre g
WHERE EXISTS (SELECT 1 FROM content.genre_film_work gfw WHERE gfw.genre_id = g.id)
  AND ($1::timestamptz IS NULL OR g.modified > $1)
"#;

const CONTRIBUTORS: &str = r#"
SELECT
    p.id,
    p.full_name,
    p.modified,
    json_agg(jsonb_build_object('id', pfw.film_work_id, 'roles', pfw.roles)) AS films
FROM content.person p
JOIN (
    SELECT person_id, film_work_id, array_agg(DISTINCT role) AS roles
    FROM content.person_film_work
    GROUP BY person_id, film_work_id
) pfw ON pfw.person_id = p.id
WHERE ($1::timestamptz IS NULL OR p.modified > $1)
GROUP BY p.id
"#;

pub fn inner_query(query: SourceQuery) -> &'static str {
    match query {
        SourceQuery::Works => WORKS,
        SourceQuery::WorkCategories => WORK_CATEGORIES,
        SourceQuery::WorkContributors => WORK_CONTRIBUTORS,
        SourceQuery::Categories => CATEGORIES,
        SourceQuery::Contributors => CONTRIBUTORS,
    }
}

/// `DECLARE` statement for `query`, binding `since` as `$1`.
pub fn declare_cursor(query: SourceQuery) -> String {
    format!(
        "DECLARE {cursor} NO SCROLL CURSOR FOR \
         SELECT q.modified AS modified, to_jsonb(q) AS payload \
         FROM ({inner}) q \
         ORDER BY q.modified, q.id",
        cursor = CURSOR_NAME,
        inner = inner_query(query).trim(),
    )
}

pub fn fetch_forward(batch_size: usize) -> String {
    format!("FETCH FORWARD {} FROM {}", batch_size, CURSOR_NAME)
}

pub fn close_cursor() -> String {
    format!("CLOSE {}", CURSOR_NAME)
}
