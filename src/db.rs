use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tgcontrol.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            email TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            password_digest TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Active'
        )",
        [],
    )?;

    // Older workspaces predate profile pictures. Add the column if needed.
    ensure_users_profile_picture(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            discipline TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            max_tasks INTEGER,
            PRIMARY KEY(discipline, year, semester)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            email TEXT PRIMARY KEY,
            is_coordinator INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(email) REFERENCES users(email)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_coordinations(
            teacher_email TEXT NOT NULL,
            class_discipline TEXT NOT NULL,
            class_year INTEGER NOT NULL,
            class_semester INTEGER NOT NULL,
            supervised_stage INTEGER NOT NULL,
            PRIMARY KEY(teacher_email, class_discipline, class_year, class_semester, supervised_stage),
            FOREIGN KEY(teacher_email) REFERENCES teachers(email),
            FOREIGN KEY(class_discipline, class_year, class_semester)
                REFERENCES classes(discipline, year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_coordinations_teacher
         ON class_coordinations(teacher_email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            email TEXT PRIMARY KEY,
            personal_email TEXT,
            advisor_email TEXT,
            agreement_document_url TEXT NOT NULL,
            class_discipline TEXT NOT NULL,
            class_year INTEGER NOT NULL,
            class_semester INTEGER NOT NULL,
            current_stage INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(email) REFERENCES users(email),
            FOREIGN KEY(advisor_email) REFERENCES teachers(email),
            FOREIGN KEY(class_discipline, class_year, class_semester)
                REFERENCES classes(discipline, year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_advisor ON students(advisor_email)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class
         ON students(class_discipline, class_year, class_semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            student_email TEXT NOT NULL,
            sequence_order INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            due_date TEXT,
            status TEXT NOT NULL,
            stage INTEGER NOT NULL,
            PRIMARY KEY(student_email, sequence_order),
            FOREIGN KEY(student_email) REFERENCES students(email)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_submissions(
            student_email TEXT NOT NULL,
            sequence_order INTEGER NOT NULL,
            attempt_number INTEGER NOT NULL,
            submitted_at TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            PRIMARY KEY(student_email, sequence_order, attempt_number),
            FOREIGN KEY(student_email, sequence_order)
                REFERENCES tasks(student_email, sequence_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_submissions_task
         ON task_submissions(student_email, sequence_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_reviews(
            student_email TEXT NOT NULL,
            sequence_order INTEGER NOT NULL,
            submitted_at TEXT NOT NULL,
            reviewer_email TEXT NOT NULL,
            status TEXT NOT NULL,
            review_comment TEXT,
            reviewed_at TEXT NOT NULL,
            PRIMARY KEY(student_email, sequence_order, submitted_at),
            FOREIGN KEY(student_email, sequence_order)
                REFERENCES tasks(student_email, sequence_order),
            FOREIGN KEY(reviewer_email) REFERENCES teachers(email)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_reviews_task
         ON task_reviews(student_email, sequence_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            user_email TEXT NOT NULL,
            created_at TEXT NOT NULL,
            content TEXT NOT NULL,
            related_student_email TEXT,
            related_sequence_order INTEGER,
            is_read INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(user_email) REFERENCES users(email)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS defenses(
            id TEXT PRIMARY KEY,
            student_email TEXT NOT NULL,
            scheduler_email TEXT NOT NULL,
            defense_at TEXT NOT NULL,
            location TEXT NOT NULL,
            evaluation_panel TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(student_email) REFERENCES students(email),
            FOREIGN KEY(scheduler_email) REFERENCES teachers(email),
            UNIQUE(defense_at, location)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_defenses_student ON defenses(student_email)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_profile_picture(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "profile_picture_url")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN profile_picture_url TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
