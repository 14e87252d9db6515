use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use fake::Fake;
use fake::faker::address::en::CityName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::{FirstName, LastName};
use tracing::info;

use miride::PgPool;
use miride::cars::{Car, CarStatus, NewCar};
use miride::cars_repo::CarsRepository;
use miride::config::AppConfig;
use miride::rentals::{Rental, RentalChanges, RentalStatus};
use miride::rentals_repo::{BookingRequest, RentalsRepository};
use miride::users::{CreateUserRequest, User, UserRole};
use miride::users_repo::UsersRepository;

const MAKES: [(&str, &[&str]); 5] = [
    ("Toyota", &["Corolla", "RAV4", "Prius"]),
    ("Honda", &["Civic", "CR-V", "Fit"]),
    ("Ford", &["Focus", "Escape", "Mustang"]),
    ("Tesla", &["Model 3", "Model Y"]),
    ("Volkswagen", &["Golf", "Tiguan", "Passat"]),
];

/// Seed a known set of accounts plus random listings for local development
/// and E2E tests.
///
/// Environment variables:
/// - TEST_USER_PASSWORD: Password for the three known accounts (default: testpassword123)
/// - SEED_COUNT: Number of additional fake owners (default: 10)
pub async fn handle_seed_test_data(pool: &PgPool) -> Result<()> {
    info!("Starting test data seed");

    let config = AppConfig::for_maintenance()?;
    let users_repo = UsersRepository::new(pool.clone());
    let cars_repo = CarsRepository::new(pool.clone());
    let rentals_repo = RentalsRepository::new(pool.clone());

    let password =
        std::env::var("TEST_USER_PASSWORD").unwrap_or_else(|_| "testpassword123".to_string());
    let seed_count: usize = std::env::var("SEED_COUNT")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(10);

    if users_repo.get_by_email("admin@miride.test").await?.is_some() {
        info!("Test data already present, nothing to do");
        return Ok(());
    }

    let _admin = create_known_user(&users_repo, "admin", UserRole::Admin, &password).await?;
    let owner = create_known_user(&users_repo, "owner", UserRole::Owner, &password).await?;
    let customer =
        create_known_user(&users_repo, "customer", UserRole::Customer, &password).await?;

    info!("Creating cars for the known owner");
    let mut owner_cars = Vec::new();
    for index in 0..3 {
        owner_cars.push(create_available_car(&cars_repo, &owner, index).await?);
    }

    info!(count = seed_count, "Creating fake owners");
    for index in 0..seed_count {
        let fake_owner = users_repo
            .create_user(&CreateUserRequest {
                first_name: FirstName().fake(),
                last_name: LastName().fake(),
                email: format!("{}.{}", index, SafeEmail().fake::<String>()),
                password: password.clone(),
                role: UserRole::Owner,
                phone: None,
            })
            .await?;
        for car_index in 0..(1..3).fake::<usize>() {
            create_available_car(&cars_repo, &fake_owner, index * 3 + car_index + 10).await?;
        }
    }

    info!("Creating rentals across statuses");
    let today = Utc::now().date_naive();
    let car = &owner_cars[0];
    let scenarios = [
        RentalStatus::PendingApproval,
        RentalStatus::Approved,
        RentalStatus::Active,
        RentalStatus::Completed,
        RentalStatus::Rejected,
        RentalStatus::Cancelled,
    ];
    for (index, target) in scenarios.into_iter().enumerate() {
        let start_date = today + Duration::days(7 * index as i64 + 1);
        let rental = book(&rentals_repo, &config, car, &customer, start_date, today).await?;
        let rental = advance(&rentals_repo, rental, target, &customer).await?;
        info!(rental_id = %rental.id, status = %rental.status, "Seeded rental");
    }

    info!("Test data seed completed successfully");
    info!("Known accounts (password: {}):", password);
    info!("  admin@miride.test");
    info!("  owner@miride.test");
    info!("  customer@miride.test");

    Ok(())
}

async fn create_known_user(
    users_repo: &UsersRepository,
    name: &str,
    role: UserRole,
    password: &str,
) -> Result<User> {
    info!(role = role.as_str(), "Creating known test user");
    users_repo
        .create_user(&CreateUserRequest {
            first_name: "Test".to_string(),
            last_name: name[..1].to_uppercase() + &name[1..],
            email: format!("{}@miride.test", name),
            password: password.to_string(),
            role,
            phone: None,
        })
        .await
        .with_context(|| format!("Failed to create {} test user", name))
}

async fn create_available_car(cars_repo: &CarsRepository, owner: &User, index: usize) -> Result<Car> {
    let (make, models) = MAKES[index % MAKES.len()];
    let model = models[(0..models.len()).fake::<usize>()];

    let car = cars_repo
        .create(NewCar {
            owner_id: owner.id,
            make: make.to_string(),
            model: model.to_string(),
            year: (2012..2025).fake(),
            license_plate: format!("SEED{:04}", index),
            location: CityName().fake(),
            seats: (2..8).fake(),
            description: Some(Sentence(6..12).fake()),
            daily_rate_cents: (25..150).fake::<i32>() * 100,
            status: CarStatus::PendingReview,
        })
        .await?;

    cars_repo
        .set_status(car.id, CarStatus::Available)
        .await?
        .context("Seeded car disappeared")
}

async fn book(
    rentals_repo: &RentalsRepository,
    config: &AppConfig,
    car: &Car,
    customer: &User,
    start_date: NaiveDate,
    today: NaiveDate,
) -> Result<Rental> {
    rentals_repo
        .create_booking(
            BookingRequest {
                car_id: car.id,
                customer_id: customer.id,
                start_date,
                end_date: start_date + Duration::days(3),
                customer_note: Some("Seeded booking".to_string()),
                today,
            },
            config.commission,
            config.currency.clone(),
        )
        .await
}

/// Walk a fresh booking through the state machine until it reaches `target`
async fn advance(
    rentals_repo: &RentalsRepository,
    mut rental: Rental,
    target: RentalStatus,
    customer: &User,
) -> Result<Rental> {
    let path: &[RentalStatus] = match target {
        RentalStatus::PendingApproval => &[],
        RentalStatus::Approved => &[RentalStatus::Approved],
        RentalStatus::Active => &[RentalStatus::Approved, RentalStatus::Active],
        RentalStatus::Completed => &[
            RentalStatus::Approved,
            RentalStatus::Active,
            RentalStatus::Completed,
        ],
        RentalStatus::Rejected => &[RentalStatus::Rejected],
        RentalStatus::Cancelled => &[RentalStatus::Cancelled],
    };

    for &next in path {
        if next == RentalStatus::Active {
            let session_id = format!("cs_seed_{}", rental.id.simple());
            rentals_repo
                .set_checkout_session(rental.id, session_id.clone())
                .await?;
            rental = rentals_repo
                .mark_paid(
                    rental.id,
                    session_id,
                    Some(format!("pi_seed_{}", rental.id.simple())),
                )
                .await?
                .context("Seeded rental could not be marked paid")?;
        }

        let mut changes = RentalChanges::stamped(next, Utc::now());
        match next {
            RentalStatus::Rejected => {
                changes.rejection_reason = Some("Car is in the shop that week".to_string())
            }
            RentalStatus::Cancelled => {
                changes.cancellation_reason = Some("Plans changed".to_string());
                changes.cancelled_by = Some(customer.id);
            }
            _ => {}
        }

        rental = rentals_repo
            .transition(rental.id, rental.status, next, changes)
            .await?
            .with_context(|| format!("Seeded rental could not move to {}", next))?;
    }

    Ok(rental)
}
